//! Processed-file status tracking
//!
//! An optional side database records the lifecycle of each produced file.
//! Watchers stamp rows as files move through a load cycle; producers create
//! the rows as `pending`/`transferred` before blueshift ever sees them.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::config::StatusDbConfig;

/// Lifecycle labels a file's status row may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Transferred,
    Processing,
    Upserted,
    Failed,
}

impl FileStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Transferred => "transferred",
            FileStatus::Processing => "processing",
            FileStatus::Upserted => "upserted",
            FileStatus::Failed => "failed",
        }
    }
}

/// Shared pool over the status database.
#[derive(Clone)]
pub struct StatusDb {
    pool: PgPool,
    update_sql: String,
}

impl StatusDb {
    pub async fn connect(config: &StatusDbConfig) -> Result<Self> {
        let pool = PgPool::connect(&config.dsn)
            .await
            .context("failed to connect to status database")?;
        log::info!(
            "status database connected, stamping {}.{}",
            config.schema,
            config.table
        );

        Ok(Self {
            update_sql: format!(
                "UPDATE {}.{} SET status = $1 WHERE filename = $2",
                config.schema, config.table
            ),
            pool,
        })
    }

    /// Stamp one file's row. Exactly one row must match the filename.
    pub async fn update_status(&self, filename: &str, status: FileStatus) -> Result<()> {
        let affected = sqlx::query(&self.update_sql)
            .bind(status.as_str())
            .bind(filename)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to stamp {filename} as {}", status.as_str()))?
            .rows_affected();

        if affected != 1 {
            anyhow::bail!(
                "expected exactly one status row for {filename}, updated {affected}"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(FileStatus::Pending.as_str(), "pending");
        assert_eq!(FileStatus::Transferred.as_str(), "transferred");
        assert_eq!(FileStatus::Processing.as_str(), "processing");
        assert_eq!(FileStatus::Upserted.as_str(), "upserted");
        assert_eq!(FileStatus::Failed.as_str(), "failed");
    }
}
