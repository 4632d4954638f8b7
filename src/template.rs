//! `{{NAME}}` environment-variable substitution
//!
//! Descriptor fields and connection parameters may reference environment
//! variables with `{{NAME}}` placeholders, resolved at load time.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_]*)\}\}").unwrap());

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("environment variable {0} referenced by template is not set")]
    MissingVariable(String),
}

/// Replace every `{{NAME}}` placeholder in `input` with the value of the
/// environment variable `NAME`. A referenced variable that is unset is an
/// error rather than an empty substitution.
pub fn expand(input: &str) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(input) {
        let whole = caps.get(0).unwrap();
        let name = &caps[1];
        let value =
            std::env::var(name).map_err(|_| TemplateError::MissingVariable(name.to_string()))?;

        out.push_str(&input[last..whole.start()]);
        out.push_str(&value);
        last = whole.end();
    }

    out.push_str(&input[last..]);
    Ok(out)
}

/// Expand an optional field, passing `None` through untouched.
pub fn expand_opt(input: Option<&str>) -> Result<Option<String>, TemplateError> {
    input.map(expand).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_plain_text_passes_through() {
        assert_eq!(expand("no placeholders here").unwrap(), "no placeholders here");
    }

    #[test]
    fn test_single_substitution() {
        Jail::expect_with(|jail| {
            jail.set_env("BLUESHIFT_TEST_USER", "loader");

            assert_eq!(expand("{{BLUESHIFT_TEST_USER}}").unwrap(), "loader");
            Ok(())
        });
    }

    #[test]
    fn test_embedded_substitution() {
        Jail::expect_with(|jail| {
            jail.set_env("BLUESHIFT_TEST_HOST", "warehouse.example.com");

            assert_eq!(
                expand("jdbc:postgresql://{{BLUESHIFT_TEST_HOST}}:5439/analytics").unwrap(),
                "jdbc:postgresql://warehouse.example.com:5439/analytics"
            );
            Ok(())
        });
    }

    #[test]
    fn test_multiple_placeholders() {
        Jail::expect_with(|jail| {
            jail.set_env("BLUESHIFT_TEST_A", "one");
            jail.set_env("BLUESHIFT_TEST_B", "two");

            assert_eq!(
                expand("{{BLUESHIFT_TEST_A}}-{{BLUESHIFT_TEST_B}}").unwrap(),
                "one-two"
            );
            Ok(())
        });
    }

    #[test]
    fn test_missing_variable_is_an_error() {
        let err = expand("{{BLUESHIFT_TEST_DEFINITELY_UNSET}}").unwrap_err();
        assert!(err.to_string().contains("BLUESHIFT_TEST_DEFINITELY_UNSET"));
    }

    #[test]
    fn test_expand_opt() {
        assert_eq!(expand_opt(None).unwrap(), None);
        assert_eq!(expand_opt(Some("plain")).unwrap(), Some("plain".to_string()));
    }
}
