//! Load-directory descriptors
//!
//! Each load directory carries a `manifest.edn` object describing the target
//! table, the warehouse connection, which sibling keys are data files, and
//! the merge strategy to apply. Parsing and validation failures are
//! non-fatal: the directory simply stays in scan until the descriptor is
//! fixed.

use std::time::Duration;

use regex::Regex;
use thiserror::Error;

use crate::edn::{Edn, EdnError};

/// Default per-statement execution timeout: one hour.
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_millis(3_600_000);

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("descriptor is not valid edn: {0}")]
    Edn(#[from] EdnError),
    #[error("descriptor is not a map")]
    NotAMap,
    #[error("descriptor field {0} is missing")]
    MissingField(&'static str),
    #[error("descriptor field {field} has the wrong type (expected {expected})")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("unknown strategy {0}")]
    UnknownStrategy(String),
    #[error("unknown staging-select {0}")]
    UnknownStagingSelect(String),
    #[error("data-pattern does not compile: {0}")]
    BadDataPattern(#[from] regex::Error),
    #[error("strategy {0} requires at least one pk-column")]
    MissingPkColumns(&'static str),
    #[error("pk-nulls column {0} is not a pk-column")]
    PkNullNotPk(String),
    #[error("columns must be non-empty")]
    EmptyColumns,
}

/// Ingestion strategy for a load directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    #[default]
    Merge,
    DeleteNullHashMerge,
    DeleteNullHashMergeCustomer,
    Replace,
    Append,
    Add,
}

impl Strategy {
    fn parse(name: &str) -> Result<Self, DescriptorError> {
        match name {
            "merge" => Ok(Strategy::Merge),
            "delete-null-hash-merge" => Ok(Strategy::DeleteNullHashMerge),
            "delete-null-hash-merge-customer" => Ok(Strategy::DeleteNullHashMergeCustomer),
            "replace" => Ok(Strategy::Replace),
            "append" => Ok(Strategy::Append),
            "add" => Ok(Strategy::Add),
            other => Err(DescriptorError::UnknownStrategy(other.to_string())),
        }
    }

    fn needs_pk_columns(self) -> Option<&'static str> {
        match self {
            Strategy::Merge => Some("merge"),
            Strategy::DeleteNullHashMerge => Some("delete-null-hash-merge"),
            Strategy::DeleteNullHashMergeCustomer => Some("delete-null-hash-merge-customer"),
            Strategy::Append => Some("append"),
            Strategy::Replace | Strategy::Add => None,
        }
    }
}

/// Override for the SELECT body used when reading back from staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingSelect {
    /// Template string; `{{table}}` is substituted with the staging name.
    Template(String),
    Distinct,
    DistinctHash,
}

/// Parsed and validated per-directory descriptor.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub table: String,
    pub schema: Option<String>,
    pub jdbc_url: String,
    pub username: String,
    pub password: String,
    pub columns: Vec<String>,
    pub full_columns: Vec<String>,
    pub pk_columns: Vec<String>,
    pub pk_nulls: Vec<String>,
    pub data_pattern: Regex,
    pub strategy: Strategy,
    pub options: Vec<String>,
    pub staging_select: Option<StagingSelect>,
    pub delete_null_hash_merge_data_sources: Vec<String>,
    pub add_status: bool,
    pub data_sources: Vec<String>,
    pub statement_timeout: Duration,
}

impl Descriptor {
    /// Parse a descriptor from `manifest.edn` text and validate it.
    pub fn parse(input: &str) -> Result<Descriptor, DescriptorError> {
        let edn = Edn::parse(input)?;
        if !matches!(edn, Edn::Map(_)) {
            return Err(DescriptorError::NotAMap);
        }

        let strategy = match field(&edn, "strategy") {
            None => Strategy::default(),
            Some(value) => {
                let name = value
                    .as_symbol()
                    .or_else(|| value.as_str())
                    .ok_or(DescriptorError::WrongType {
                        field: "strategy",
                        expected: "symbol",
                    })?;
                Strategy::parse(name)?
            }
        };

        let columns = string_vec(&edn, "columns")?;
        let full_columns = match field(&edn, "full-columns") {
            Some(_) => string_vec(&edn, "full-columns")?,
            None => columns.clone(),
        };

        let staging_select = match field(&edn, "staging-select") {
            None => None,
            Some(Edn::String(template)) => Some(StagingSelect::Template(template.clone())),
            Some(Edn::Symbol(name)) => match name.as_str() {
                "distinct" => Some(StagingSelect::Distinct),
                "distinct-hash" => Some(StagingSelect::DistinctHash),
                other => return Err(DescriptorError::UnknownStagingSelect(other.to_string())),
            },
            Some(_) => {
                return Err(DescriptorError::WrongType {
                    field: "staging-select",
                    expected: "string or symbol",
                });
            }
        };

        let statement_timeout = match field(&edn, "execute-opts")
            .and_then(|opts| opts.get("timeout-millis"))
        {
            None => DEFAULT_STATEMENT_TIMEOUT,
            Some(value) => {
                let millis = value.as_i64().ok_or(DescriptorError::WrongType {
                    field: "execute-opts",
                    expected: "integer timeout-millis",
                })?;
                Duration::from_millis(millis.max(0) as u64)
            }
        };

        let descriptor = Descriptor {
            table: required_string(&edn, "table")?,
            schema: optional_string(&edn, "schema")?,
            jdbc_url: required_string(&edn, "jdbc-url")?,
            username: required_string(&edn, "username")?,
            password: required_string(&edn, "password")?,
            columns,
            full_columns,
            pk_columns: string_vec(&edn, "pk-columns")?,
            pk_nulls: string_vec(&edn, "pk-nulls")?,
            data_pattern: Regex::new(&required_string(&edn, "data-pattern")?)?,
            strategy,
            options: string_vec(&edn, "options")?,
            staging_select,
            delete_null_hash_merge_data_sources: string_vec(
                &edn,
                "delete-null-hash-merge-data-sources",
            )?,
            add_status: match field(&edn, "add-status") {
                None => false,
                Some(value) => value.as_bool().ok_or(DescriptorError::WrongType {
                    field: "add-status",
                    expected: "boolean",
                })?,
            },
            data_sources: string_vec(&edn, "data-sources")?,
            statement_timeout,
        };

        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<(), DescriptorError> {
        if let Some(strategy) = self.strategy.needs_pk_columns()
            && self.pk_columns.is_empty()
        {
            return Err(DescriptorError::MissingPkColumns(strategy));
        }
        for pk_null in &self.pk_nulls {
            if !self.pk_columns.contains(pk_null) {
                return Err(DescriptorError::PkNullNotPk(pk_null.clone()));
            }
        }
        if self.columns.is_empty() {
            return Err(DescriptorError::EmptyColumns);
        }
        Ok(())
    }
}

/// Field lookup treating an explicit `nil` the same as an absent key.
fn field<'a>(edn: &'a Edn, name: &str) -> Option<&'a Edn> {
    edn.get(name).filter(|value| !value.is_nil())
}

fn required_string(edn: &Edn, name: &'static str) -> Result<String, DescriptorError> {
    field(edn, name)
        .ok_or(DescriptorError::MissingField(name))?
        .as_str()
        .map(str::to_string)
        .ok_or(DescriptorError::WrongType {
            field: name,
            expected: "string",
        })
}

fn optional_string(edn: &Edn, name: &'static str) -> Result<Option<String>, DescriptorError> {
    match field(edn, name) {
        None => Ok(None),
        Some(value) => value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or(DescriptorError::WrongType {
                field: name,
                expected: "string",
            }),
    }
}

fn string_vec(edn: &Edn, name: &'static str) -> Result<Vec<String>, DescriptorError> {
    match field(edn, name) {
        None => Ok(Vec::new()),
        Some(value) => value
            .as_vec()
            .ok_or(DescriptorError::WrongType {
                field: name,
                expected: "vector of strings",
            })?
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or(DescriptorError::WrongType {
                        field: name,
                        expected: "vector of strings",
                    })
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        {:table "events"
         :jdbc-url "jdbc:postgresql://warehouse:5439/analytics"
         :username "loader"
         :password "secret"
         :columns ["id" "value"]
         :pk-columns ["id"]
         :data-pattern ".*\\.gz"}
    "#;

    #[test]
    fn test_minimal_descriptor_defaults() {
        let descriptor = Descriptor::parse(MINIMAL).unwrap();

        assert_eq!(descriptor.table, "events");
        assert_eq!(descriptor.schema, None);
        assert_eq!(descriptor.strategy, Strategy::Merge);
        assert_eq!(descriptor.full_columns, descriptor.columns);
        assert!(descriptor.pk_nulls.is_empty());
        assert!(descriptor.options.is_empty());
        assert!(!descriptor.add_status);
        assert_eq!(descriptor.statement_timeout, DEFAULT_STATEMENT_TIMEOUT);
        assert!(descriptor.data_pattern.is_match("prod/events/a.gz"));
        assert!(!descriptor.data_pattern.is_match("prod/events/manifest.edn"));
    }

    #[test]
    fn test_full_descriptor() {
        let descriptor = Descriptor::parse(
            r#"{:table "orders"
                :schema "public"
                :jdbc-url "jdbc:postgresql://{{WAREHOUSE_HOST}}:5439/analytics"
                :username "loader"
                :password "{{WAREHOUSE_PASSWORD}}"
                :columns ["id" "amount" "hash"]
                :full-columns ["id" "amount" "hash" "update_ts"]
                :pk-columns ["id" "region"]
                :pk-nulls ["region"]
                :data-pattern ".*\\.csv\\.gz"
                :strategy delete-null-hash-merge
                :options ["GZIP" "TRUNCATECOLUMNS"]
                :staging-select distinct-hash
                :delete-null-hash-merge-data-sources ["partner-a"]
                :add-status true
                :data-sources ["partner-a" "partner-b"]
                :execute-opts {:timeout-millis 120000}}"#,
        )
        .unwrap();

        assert_eq!(descriptor.schema.as_deref(), Some("public"));
        assert_eq!(descriptor.strategy, Strategy::DeleteNullHashMerge);
        assert_eq!(descriptor.options, ["GZIP", "TRUNCATECOLUMNS"]);
        assert_eq!(descriptor.staging_select, Some(StagingSelect::DistinctHash));
        assert_eq!(descriptor.pk_nulls, ["region"]);
        assert_eq!(descriptor.statement_timeout, Duration::from_millis(120000));
        assert!(descriptor.add_status);
        // Placeholders survive parsing; templating happens at load time.
        assert!(descriptor.jdbc_url.contains("{{WAREHOUSE_HOST}}"));
    }

    #[test]
    fn test_staging_select_template() {
        let descriptor = Descriptor::parse(
            r#"{:table "t" :jdbc-url "u" :username "u" :password "p"
                :columns ["a"] :pk-columns ["a"] :data-pattern ".*"
                :staging-select "select a, max(b) from {{table}} group by a"}"#,
        )
        .unwrap();

        assert_eq!(
            descriptor.staging_select,
            Some(StagingSelect::Template(
                "select a, max(b) from {{table}} group by a".to_string()
            ))
        );
    }

    #[test]
    fn test_missing_required_field() {
        let err = Descriptor::parse(r#"{:table "t"}"#).unwrap_err();
        assert!(matches!(err, DescriptorError::MissingField("jdbc-url")));
    }

    #[test]
    fn test_nil_is_treated_as_absent() {
        let descriptor = Descriptor::parse(
            r#"{:table "t" :schema nil :jdbc-url "u" :username "u" :password "p"
                :columns ["a"] :pk-columns ["a"] :pk-nulls nil :data-pattern ".*"}"#,
        )
        .unwrap();

        assert_eq!(descriptor.schema, None);
        assert!(descriptor.pk_nulls.is_empty());
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let err = Descriptor::parse(
            r#"{:table "t" :jdbc-url "u" :username "u" :password "p"
                :columns ["a"] :pk-columns ["a"] :data-pattern ".*"
                :strategy upsert}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DescriptorError::UnknownStrategy(name) if name == "upsert"));
    }

    #[test]
    fn test_merge_requires_pk_columns() {
        let err = Descriptor::parse(
            r#"{:table "t" :jdbc-url "u" :username "u" :password "p"
                :columns ["a"] :data-pattern ".*"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DescriptorError::MissingPkColumns("merge")));
    }

    #[test]
    fn test_add_does_not_require_pk_columns() {
        let descriptor = Descriptor::parse(
            r#"{:table "t" :jdbc-url "u" :username "u" :password "p"
                :columns ["a"] :data-pattern ".*" :strategy add}"#,
        )
        .unwrap();
        assert_eq!(descriptor.strategy, Strategy::Add);
    }

    #[test]
    fn test_pk_nulls_must_be_subset_of_pk_columns() {
        let err = Descriptor::parse(
            r#"{:table "t" :jdbc-url "u" :username "u" :password "p"
                :columns ["a"] :pk-columns ["a"] :pk-nulls ["b"]
                :data-pattern ".*"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DescriptorError::PkNullNotPk(name) if name == "b"));
    }

    #[test]
    fn test_bad_data_pattern_is_rejected() {
        let err = Descriptor::parse(
            r#"{:table "t" :jdbc-url "u" :username "u" :password "p"
                :columns ["a"] :pk-columns ["a"] :data-pattern "["}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DescriptorError::BadDataPattern(_)));
    }

    #[test]
    fn test_empty_columns_rejected() {
        let err = Descriptor::parse(
            r#"{:table "t" :jdbc-url "u" :username "u" :password "p"
                :columns [] :pk-columns ["a"] :data-pattern ".*"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DescriptorError::EmptyColumns));
    }
}
