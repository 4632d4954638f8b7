//! Warehouse connection handling and transactional statement execution
//!
//! The warehouse speaks the PostgreSQL wire protocol. Each load cycle opens
//! a dedicated connection, runs its statement sequence inside one explicit
//! transaction under a per-statement timeout, and closes the connection on
//! every exit path. A connection is never shared across tasks.

use std::time::Duration;

use thiserror::Error;
use tokio_postgres::NoTls;
use url::Url;

use crate::metrics::ImportMetrics;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("invalid warehouse url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("failed to connect to warehouse: {0}")]
    Connect(#[source] tokio_postgres::Error),
    #[error("statement failed: {statement}: {source}")]
    Sql {
        statement: String,
        #[source]
        source: tokio_postgres::Error,
    },
    #[error("statement timed out after {timeout:?}: {statement}")]
    Timeout { statement: String, timeout: Duration },
}

impl WarehouseError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, WarehouseError::Timeout { .. })
    }
}

/// Execution options for a statement sequence.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub statement_timeout: Duration,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            statement_timeout: crate::descriptor::DEFAULT_STATEMENT_TIMEOUT,
        }
    }
}

/// One row of the warehouse's per-file load-error table.
#[derive(Debug, Clone)]
pub struct LoadErrorRow {
    pub filename: String,
    pub line_number: i64,
    pub colname: String,
    pub err_reason: String,
}

/// A dedicated warehouse connection plus its driver task.
pub struct Warehouse {
    client: tokio_postgres::Client,
    connection_task: tokio::task::JoinHandle<()>,
    metrics: ImportMetrics,
}

impl Warehouse {
    /// Open a connection. Accepts both `jdbc:postgresql://` and plain
    /// `postgresql://` URLs; the username/password arguments override any
    /// userinfo embedded in the URL.
    pub async fn connect(
        jdbc_url: &str,
        username: &str,
        password: &str,
        metrics: ImportMetrics,
    ) -> Result<Self, WarehouseError> {
        let config = pg_config(jdbc_url, username, password)?;

        let (client, connection) = config.connect(NoTls).await.map_err(WarehouseError::Connect)?;
        let connection_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                log::warn!("warehouse connection error: {e}");
            }
        });

        metrics.connection_opened();
        Ok(Self {
            client,
            connection_task,
            metrics,
        })
    }

    /// Run `statements` sequentially inside one transaction. Commits only
    /// when every statement succeeds; any failure rolls back. A statement
    /// exceeding the per-statement timeout is cancelled at the driver level
    /// and reported as a timeout failure.
    pub async fn run_transaction(
        &self,
        opts: &ExecuteOptions,
        statements: &[String],
    ) -> Result<(), WarehouseError> {
        self.execute_one(opts, "BEGIN").await?;

        let result = async {
            self.execute_all(opts, statements).await?;
            self.execute_one(opts, "COMMIT").await
        }
        .await;

        match result {
            Ok(()) => {
                self.metrics.mark_commit();
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = self.client.batch_execute("ROLLBACK").await {
                    log::warn!("rollback failed after load error: {rollback_err}");
                }
                self.metrics.mark_rollback();
                Err(e)
            }
        }
    }

    async fn execute_all(
        &self,
        opts: &ExecuteOptions,
        statements: &[String],
    ) -> Result<(), WarehouseError> {
        for statement in statements {
            log::debug!("executing: {statement}");
            self.execute_one(opts, statement).await?;
        }
        Ok(())
    }

    async fn execute_one(&self, opts: &ExecuteOptions, statement: &str) -> Result<(), WarehouseError> {
        match tokio::time::timeout(opts.statement_timeout, self.client.batch_execute(statement))
            .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(WarehouseError::Sql {
                statement: statement.to_string(),
                source,
            }),
            Err(_) => {
                self.metrics.mark_timeout();
                let cancel = self.client.cancel_token();
                if let Err(e) = cancel.cancel_query(NoTls).await {
                    log::warn!("failed to cancel timed-out statement: {e}");
                }
                Err(WarehouseError::Timeout {
                    statement: statement.to_string(),
                    timeout: opts.statement_timeout,
                })
            }
        }
    }

    /// Most recent load errors referencing the given file URLs, one row per
    /// filename keyed by its highest query id.
    pub async fn recent_load_errors(
        &self,
        file_urls: &[String],
    ) -> Result<Vec<LoadErrorRow>, WarehouseError> {
        if file_urls.is_empty() {
            return Ok(Vec::new());
        }

        let filenames = file_urls
            .iter()
            .map(|url| format!("'{url}'"))
            .collect::<Vec<_>>()
            .join(", ");
        // stl_load_errors stores filename as a blank-padded CHAR column.
        let statement = format!(
            "SELECT trim(e.filename), e.line_number, trim(e.colname), trim(e.err_reason) \
             FROM stl_load_errors e \
             JOIN (SELECT trim(filename) AS filename, MAX(query) AS query \
                   FROM stl_load_errors GROUP BY trim(filename)) latest \
               ON trim(e.filename) = latest.filename AND e.query = latest.query \
             WHERE trim(e.filename) IN ({filenames})"
        );

        let rows = self
            .client
            .query(&statement, &[])
            .await
            .map_err(|source| WarehouseError::Sql {
                statement: statement.clone(),
                source,
            })?;

        let mut errors: Vec<LoadErrorRow> = Vec::new();
        for row in rows {
            let filename: String = row.get(0);
            // A single failed query can log several rows per file; the first
            // is enough to locate and describe the offending object.
            if errors.iter().any(|e| e.filename == filename) {
                continue;
            }
            errors.push(LoadErrorRow {
                filename,
                line_number: row.get(1),
                colname: row.get(2),
                err_reason: row.get(3),
            });
        }
        Ok(errors)
    }
}

impl Drop for Warehouse {
    fn drop(&mut self) {
        self.connection_task.abort();
        self.metrics.connection_closed();
    }
}

/// Build a driver config from a JDBC-style warehouse URL.
fn pg_config(
    jdbc_url: &str,
    username: &str,
    password: &str,
) -> Result<tokio_postgres::Config, WarehouseError> {
    let raw = jdbc_url.strip_prefix("jdbc:").unwrap_or(jdbc_url);
    let parsed = Url::parse(raw).map_err(|e| WarehouseError::InvalidUrl {
        url: jdbc_url.to_string(),
        reason: e.to_string(),
    })?;

    let host = parsed
        .host_str()
        .ok_or_else(|| WarehouseError::InvalidUrl {
            url: jdbc_url.to_string(),
            reason: "missing host".to_string(),
        })?;
    let dbname = parsed.path().trim_start_matches('/');
    if dbname.is_empty() {
        return Err(WarehouseError::InvalidUrl {
            url: jdbc_url.to_string(),
            reason: "missing database name".to_string(),
        });
    }

    let mut config = tokio_postgres::Config::new();
    config
        .host(host)
        .port(parsed.port().unwrap_or(5439))
        .dbname(dbname)
        .user(username)
        .password(password);
    Ok(config)
}
