//! Reader for the EDN subset used by load-directory descriptors
//!
//! Descriptors are small EDN maps of keywords to strings, vectors, booleans
//! and integers. This reader covers exactly that subset: maps, vectors,
//! lists, strings, keywords, symbols, integers, booleans and nil. Tagged
//! literals, sets, floats and character literals are not part of the
//! descriptor corpus and are rejected.

use std::collections::BTreeMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EdnError {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),
    #[error("unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },
    #[error("map literal has a dangling key at offset {0}")]
    OddMapArity(usize),
    #[error("map key at offset {0} is not a keyword or string")]
    InvalidMapKey(usize),
    #[error("invalid integer literal {literal:?} at offset {offset}")]
    InvalidInteger { literal: String, offset: usize },
    #[error("invalid escape sequence \\{ch} at offset {offset}")]
    InvalidEscape { ch: char, offset: usize },
    #[error("trailing content at offset {0}")]
    TrailingContent(usize),
}

/// An EDN value. Map keys are stored as their name without the leading `:`.
#[derive(Debug, Clone, PartialEq)]
pub enum Edn {
    Nil,
    Bool(bool),
    Int(i64),
    String(String),
    Keyword(String),
    Symbol(String),
    Vector(Vec<Edn>),
    Map(BTreeMap<String, Edn>),
}

impl Edn {
    /// Parse a single EDN form, requiring the whole input to be consumed.
    pub fn parse(input: &str) -> Result<Edn, EdnError> {
        let mut reader = Reader::new(input);
        let value = reader.read_value()?;
        reader.skip_whitespace();
        if let Some((offset, _)) = reader.peek() {
            return Err(EdnError::TrailingContent(offset));
        }
        Ok(value)
    }

    /// Look up a map entry by key name (without the leading `:`).
    pub fn get(&self, key: &str) -> Option<&Edn> {
        match self {
            Edn::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Edn::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Edn::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Edn::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Edn::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_vec(&self) -> Option<&[Edn]> {
        match self {
            Edn::Vector(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Edn::Nil)
    }
}

struct Reader<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Reader<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn peek(&mut self) -> Option<(usize, char)> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<(usize, char)> {
        self.chars.next()
    }

    fn eof_offset(&self) -> usize {
        self.input.len()
    }

    /// Whitespace, commas (whitespace in EDN) and `;` line comments.
    fn skip_whitespace(&mut self) {
        while let Some((_, ch)) = self.peek() {
            if ch.is_whitespace() || ch == ',' {
                self.bump();
            } else if ch == ';' {
                while let Some((_, ch)) = self.bump() {
                    if ch == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn read_value(&mut self) -> Result<Edn, EdnError> {
        self.skip_whitespace();
        let (offset, ch) = self.peek().ok_or(EdnError::UnexpectedEof(self.eof_offset()))?;

        match ch {
            '{' => self.read_map(),
            '[' => self.read_seq(']'),
            '(' => self.read_seq(')'),
            '"' => self.read_string(),
            ':' => self.read_keyword(),
            '-' | '0'..='9' => self.read_int(),
            ch if is_symbol_start(ch) => self.read_symbol(),
            ch => Err(EdnError::UnexpectedChar { ch, offset }),
        }
    }

    fn read_map(&mut self) -> Result<Edn, EdnError> {
        let (start, _) = self.bump().unwrap();
        let mut entries = BTreeMap::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some((_, '}')) => {
                    self.bump();
                    return Ok(Edn::Map(entries));
                }
                Some((key_offset, _)) => {
                    let key = match self.read_value()? {
                        Edn::Keyword(name) | Edn::String(name) => name,
                        _ => return Err(EdnError::InvalidMapKey(key_offset)),
                    };
                    self.skip_whitespace();
                    if matches!(self.peek(), Some((_, '}')) | None) {
                        return Err(EdnError::OddMapArity(start));
                    }
                    let value = self.read_value()?;
                    entries.insert(key, value);
                }
                None => return Err(EdnError::UnexpectedEof(self.eof_offset())),
            }
        }
    }

    fn read_seq(&mut self, close: char) -> Result<Edn, EdnError> {
        self.bump();
        let mut items = Vec::new();

        loop {
            self.skip_whitespace();
            match self.peek() {
                Some((_, ch)) if ch == close => {
                    self.bump();
                    return Ok(Edn::Vector(items));
                }
                Some(_) => items.push(self.read_value()?),
                None => return Err(EdnError::UnexpectedEof(self.eof_offset())),
            }
        }
    }

    fn read_string(&mut self) -> Result<Edn, EdnError> {
        self.bump();
        let mut out = String::new();

        loop {
            match self.bump() {
                Some((_, '"')) => return Ok(Edn::String(out)),
                Some((offset, '\\')) => {
                    let (_, esc) = self
                        .bump()
                        .ok_or(EdnError::UnexpectedEof(self.eof_offset()))?;
                    match esc {
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        ch => return Err(EdnError::InvalidEscape { ch, offset }),
                    }
                }
                Some((_, ch)) => out.push(ch),
                None => return Err(EdnError::UnexpectedEof(self.eof_offset())),
            }
        }
    }

    fn read_keyword(&mut self) -> Result<Edn, EdnError> {
        let (offset, _) = self.bump().unwrap();
        let name = self.read_symbol_chars();
        if name.is_empty() {
            return Err(EdnError::UnexpectedChar { ch: ':', offset });
        }
        Ok(Edn::Keyword(name))
    }

    fn read_symbol(&mut self) -> Result<Edn, EdnError> {
        let name = self.read_symbol_chars();
        Ok(match name.as_str() {
            "nil" => Edn::Nil,
            "true" => Edn::Bool(true),
            "false" => Edn::Bool(false),
            _ => Edn::Symbol(name),
        })
    }

    fn read_int(&mut self) -> Result<Edn, EdnError> {
        let (offset, _) = self.peek().unwrap();
        let literal = self.read_symbol_chars();
        literal
            .parse::<i64>()
            .map(Edn::Int)
            .map_err(|_| EdnError::InvalidInteger { literal, offset })
    }

    fn read_symbol_chars(&mut self) -> String {
        let mut out = String::new();
        while let Some((_, ch)) = self.peek() {
            if is_symbol_char(ch) {
                out.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        out
    }
}

fn is_symbol_start(ch: char) -> bool {
    ch.is_alphabetic() || matches!(ch, '.' | '*' | '+' | '!' | '_' | '?' | '$' | '%' | '&' | '=' | '<' | '>' | '/')
}

fn is_symbol_char(ch: char) -> bool {
    ch.is_alphanumeric() || matches!(ch, '.' | '*' | '+' | '!' | '-' | '_' | '?' | '$' | '%' | '&' | '=' | '<' | '>' | '/' | '#' | ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars() {
        assert_eq!(Edn::parse("nil").unwrap(), Edn::Nil);
        assert_eq!(Edn::parse("true").unwrap(), Edn::Bool(true));
        assert_eq!(Edn::parse("false").unwrap(), Edn::Bool(false));
        assert_eq!(Edn::parse("42").unwrap(), Edn::Int(42));
        assert_eq!(Edn::parse("-7").unwrap(), Edn::Int(-7));
        assert_eq!(
            Edn::parse("\"hello\"").unwrap(),
            Edn::String("hello".to_string())
        );
        assert_eq!(
            Edn::parse(":table").unwrap(),
            Edn::Keyword("table".to_string())
        );
        assert_eq!(
            Edn::parse("distinct-hash").unwrap(),
            Edn::Symbol("distinct-hash".to_string())
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            Edn::parse(r#""a\"b\\c\nd""#).unwrap(),
            Edn::String("a\"b\\c\nd".to_string())
        );
    }

    #[test]
    fn test_vector() {
        assert_eq!(
            Edn::parse("[\"id\" \"value\"]").unwrap(),
            Edn::Vector(vec![
                Edn::String("id".to_string()),
                Edn::String("value".to_string())
            ])
        );
    }

    #[test]
    fn test_commas_are_whitespace() {
        assert_eq!(
            Edn::parse("[1, 2, 3]").unwrap(),
            Edn::Vector(vec![Edn::Int(1), Edn::Int(2), Edn::Int(3)])
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let parsed = Edn::parse("; descriptor\n{:table \"events\"}").unwrap();
        assert_eq!(parsed.get("table").and_then(Edn::as_str), Some("events"));
    }

    #[test]
    fn test_map_with_nested_values() {
        let parsed = Edn::parse(
            r#"{:table "events"
                :pk-columns ["id"]
                :strategy merge
                :add-status true
                :execute-opts {:timeout-millis 60000}}"#,
        )
        .unwrap();

        assert_eq!(parsed.get("table").and_then(Edn::as_str), Some("events"));
        assert_eq!(
            parsed.get("pk-columns").and_then(Edn::as_vec).map(<[Edn]>::len),
            Some(1)
        );
        assert_eq!(parsed.get("strategy").and_then(Edn::as_symbol), Some("merge"));
        assert_eq!(parsed.get("add-status").and_then(Edn::as_bool), Some(true));
        assert_eq!(
            parsed
                .get("execute-opts")
                .and_then(|opts| opts.get("timeout-millis"))
                .and_then(Edn::as_i64),
            Some(60000)
        );
    }

    #[test]
    fn test_nil_valued_field() {
        let parsed = Edn::parse("{:schema nil}").unwrap();
        assert!(parsed.get("schema").unwrap().is_nil());
    }

    #[test]
    fn test_odd_map_arity_is_rejected() {
        assert!(matches!(
            Edn::parse("{:table}"),
            Err(EdnError::OddMapArity(_))
        ));
    }

    #[test]
    fn test_non_keyword_map_key_is_rejected() {
        assert!(matches!(
            Edn::parse("{[1] 2}"),
            Err(EdnError::InvalidMapKey(_))
        ));
    }

    #[test]
    fn test_unterminated_forms() {
        assert!(matches!(
            Edn::parse("[1 2"),
            Err(EdnError::UnexpectedEof(_))
        ));
        assert!(matches!(
            Edn::parse("\"open"),
            Err(EdnError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_trailing_content_is_rejected() {
        assert!(matches!(
            Edn::parse("{} {}"),
            Err(EdnError::TrailingContent(_))
        ));
    }
}
