//! Strategy loaders
//!
//! Expands a descriptor into the fixed statement sequence for its strategy
//! and runs the sequence inside one warehouse transaction. The `TableLoader`
//! trait is the seam between the directory state machine and the warehouse,
//! so cycle behavior can be exercised without a live cluster.

use async_trait::async_trait;
use thiserror::Error;

use crate::credentials::{CopyCredentials, CredentialsError};
use crate::descriptor::{Descriptor, Strategy};
use crate::metrics::ImportMetrics;
use crate::sql;
use crate::template::{self, TemplateError};
use crate::warehouse::{ExecuteOptions, Warehouse, WarehouseError};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),
    #[error("failed to expand descriptor templates: {0}")]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Credentials(#[from] CredentialsError),
}

impl LoadError {
    /// Statement timeouts get special treatment in the load cycle's cleanup.
    pub fn is_timeout(&self) -> bool {
        matches!(self, LoadError::Warehouse(e) if e.is_timeout())
    }
}

/// The statement sequence for a descriptor's strategy, in execution order.
pub fn statements_for(
    descriptor: &Descriptor,
    manifest_url: &str,
    credentials: &CopyCredentials,
) -> Vec<String> {
    let staging = sql::staging_table(descriptor);
    let copy_into_staging =
        sql::copy_from_object_store(descriptor, &staging, manifest_url, credentials);

    match descriptor.strategy {
        Strategy::Merge => vec![
            sql::create_staging(descriptor),
            copy_into_staging,
            sql::create_rnums(descriptor),
            sql::dedupe_rnums(descriptor),
            sql::drop_row_num(descriptor),
            sql::merge_from_rnums(descriptor),
            sql::drop_table(&staging),
            sql::drop_table(&sql::rnums_table(descriptor)),
        ],
        Strategy::DeleteNullHashMerge => vec![
            sql::create_staging(descriptor),
            copy_into_staging,
            sql::delete_null_hash(descriptor),
            sql::create_rnums(descriptor),
            sql::dedupe_rnums(descriptor),
            sql::drop_row_num(descriptor),
            sql::merge_from_rnums(descriptor),
            sql::drop_table(&staging),
            sql::drop_table(&sql::rnums_table(descriptor)),
        ],
        Strategy::DeleteNullHashMergeCustomer => vec![
            sql::create_staging(descriptor),
            copy_into_staging,
            sql::delete_null_hash_customer(descriptor),
            sql::create_rnums(descriptor),
            sql::dedupe_rnums(descriptor),
            sql::drop_row_num(descriptor),
            sql::merge_from_rnums(descriptor),
            sql::drop_table(&staging),
            sql::drop_table(&sql::rnums_table(descriptor)),
        ],
        Strategy::Replace => vec![
            sql::truncate(descriptor),
            sql::copy_from_object_store(
                descriptor,
                &sql::target_table(descriptor),
                manifest_url,
                credentials,
            ),
        ],
        Strategy::Append => vec![
            sql::create_staging(descriptor),
            copy_into_staging,
            sql::append_from_staging(descriptor),
            sql::drop_table(&staging),
        ],
        Strategy::Add => vec![
            sql::create_staging(descriptor),
            copy_into_staging,
            sql::add_from_staging(descriptor),
            sql::drop_table(&staging),
        ],
    }
}

/// Expand `{{ENV_VAR}}` placeholders in the descriptor's dynamic fields.
pub fn apply_templates(descriptor: &Descriptor) -> Result<Descriptor, TemplateError> {
    let mut descriptor = descriptor.clone();
    descriptor.table = template::expand(&descriptor.table)?;
    descriptor.schema = template::expand_opt(descriptor.schema.as_deref())?;
    descriptor.jdbc_url = template::expand(&descriptor.jdbc_url)?;
    descriptor.username = template::expand(&descriptor.username)?;
    descriptor.password = template::expand(&descriptor.password)?;
    Ok(descriptor)
}

#[async_trait]
pub trait TableLoader: Send + Sync {
    /// Ingest the files listed by `manifest_url` into the descriptor's
    /// target table, atomically.
    async fn load_table(&self, descriptor: &Descriptor, manifest_url: &str)
    -> Result<(), LoadError>;
}

/// Production loader running against the warehouse.
pub struct WarehouseLoader {
    metrics: ImportMetrics,
}

impl WarehouseLoader {
    pub fn new(metrics: ImportMetrics) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl TableLoader for WarehouseLoader {
    async fn load_table(
        &self,
        descriptor: &Descriptor,
        manifest_url: &str,
    ) -> Result<(), LoadError> {
        let descriptor = apply_templates(descriptor)?;
        let credentials = CopyCredentials::from_env()?;
        let statements = statements_for(&descriptor, manifest_url, &credentials);

        let warehouse = Warehouse::connect(
            &descriptor.jdbc_url,
            &descriptor.username,
            &descriptor.password,
            self.metrics.clone(),
        )
        .await?;

        let opts = ExecuteOptions {
            statement_timeout: descriptor.statement_timeout,
        };
        warehouse.run_transaction(&opts, &statements).await?;
        Ok(())
    }
}
