//! Service configuration
//!
//! Loaded from a TOML file merged with `BLUESHIFT_`-prefixed environment
//! variables over built-in defaults. The optional `[status_db]` block
//! enables lifecycle stamping; leaving it out disables stamping globally.

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_PATH: &str = "etc/config.toml";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct S3Config {
    /// Bucket holding the load directories
    pub bucket: String,
    /// Regex selecting which leaf directories to watch
    /// Env: BLUESHIFT__S3__KEY_PATTERN
    pub key_pattern: String,
    /// Base sleep between directory polls
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Random jitter added to each poll sleep
    #[serde(with = "humantime_serde")]
    pub poll_jitter: Duration,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            key_pattern: ".*".to_string(),
            poll_interval: Duration::from_secs(30),
            poll_jitter: Duration::ZERO,
        }
    }
}

/// Connection parameters for the optional status database.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusDbConfig {
    /// PostgreSQL DSN
    pub dsn: String,
    pub schema: String,
    pub table: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    pub s3: S3Config,
    /// Status database; absent disables lifecycle stamping
    pub status_db: Option<StatusDbConfig>,
}

impl Configuration {
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, Box<figment::Error>> {
        let config = Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            // Single underscore for simple fields: BLUESHIFT_S3_BUCKET
            .merge(Env::prefixed("BLUESHIFT_").split("_"))
            // Double underscore for fields with underscores: BLUESHIFT__S3__KEY_PATTERN
            .merge(Env::prefixed("BLUESHIFT__").split("__"))
            .extract()
            .map_err(Box::new)?;

        Ok(config)
    }

    /// Compile the directory-selection pattern, verifying the rest of the
    /// configuration along the way.
    pub fn validate(&self) -> anyhow::Result<Regex> {
        if self.s3.bucket.is_empty() {
            anyhow::bail!("s3.bucket must be configured");
        }
        if let Some(status_db) = &self.status_db {
            if status_db.dsn.is_empty() {
                anyhow::bail!("status_db.dsn cannot be empty");
            }
            if status_db.schema.is_empty() || status_db.table.is_empty() {
                anyhow::bail!("status_db.schema and status_db.table must be set");
            }
        }
        Regex::new(&self.s3.key_pattern)
            .map_err(|e| anyhow::anyhow!("s3.key_pattern does not compile: {e}"))
    }
}
