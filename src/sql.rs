//! Warehouse statement builders
//!
//! Pure functions from descriptor fields to SQL text. Identifiers are
//! interpolated unquoted: the descriptor is trusted, and the existing
//! descriptor corpus depends on bare-identifier output.

use crate::credentials::CopyCredentials;
use crate::descriptor::{Descriptor, StagingSelect};

/// Columns shared between target and staging when locating null-hash rows.
const NULL_HASH_KEYS: [&str; 4] = [
    "report_date",
    "data_source",
    "data_type",
    "partner_company_id",
];

/// The `-customer` variant keys on partner_order_id instead of report_date.
const NULL_HASH_CUSTOMER_KEYS: [&str; 4] = [
    "partner_order_id",
    "data_source",
    "data_type",
    "partner_company_id",
];

/// Fully-qualified target table name.
pub fn target_table(descriptor: &Descriptor) -> String {
    match &descriptor.schema {
        Some(schema) => format!("{schema}.{}", descriptor.table),
        None => descriptor.table.clone(),
    }
}

/// Staging table name. Temporary tables cannot be schema-qualified, so any
/// schema prefix present in the table field is stripped.
pub fn staging_table(descriptor: &Descriptor) -> String {
    let base = descriptor
        .table
        .rsplit('.')
        .next()
        .unwrap_or(&descriptor.table);
    format!("{base}_staging")
}

/// Row-number dedup table name, derived from the staging name.
pub fn rnums_table(descriptor: &Descriptor) -> String {
    format!("{}_rnums", staging_table(descriptor))
}

pub fn create_staging(descriptor: &Descriptor) -> String {
    format!(
        "CREATE TEMPORARY TABLE {} (LIKE {} INCLUDING DEFAULTS)",
        staging_table(descriptor),
        target_table(descriptor)
    )
}

/// COPY from the object store via an upload manifest. `table` is the COPY
/// target: the staging table for merge-family strategies, the target table
/// for replace.
pub fn copy_from_object_store(
    descriptor: &Descriptor,
    table: &str,
    manifest_url: &str,
    credentials: &CopyCredentials,
) -> String {
    let columns = descriptor.columns.join(", ");
    let mut statement = format!(
        "COPY {table} ({columns}) FROM '{manifest_url}' {}",
        credentials.sql_clause()
    );
    for option in &descriptor.options {
        statement.push(' ');
        statement.push_str(option);
    }
    statement.push_str(" manifest");
    statement
}

pub fn truncate(descriptor: &Descriptor) -> String {
    format!("TRUNCATE TABLE {}", target_table(descriptor))
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE {table}")
}

/// SELECT body reading back from staging, honoring the descriptor's
/// staging-select override.
pub fn staging_select_body(descriptor: &Descriptor) -> String {
    let staging = staging_table(descriptor);
    match &descriptor.staging_select {
        None => format!("SELECT * FROM {staging}"),
        Some(StagingSelect::Template(template)) => template.replace("{{table}}", &staging),
        Some(StagingSelect::Distinct) => format!("SELECT DISTINCT * FROM {staging}"),
        Some(StagingSelect::DistinctHash) => {
            let group_columns = descriptor
                .columns
                .iter()
                .filter(|column| column.as_str() != "hash")
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "SELECT {group_columns}, max(hash) AS hash FROM {staging} GROUP BY {group_columns}"
            )
        }
    }
}

/// Snapshot staging into a row-numbered temp table for dedup.
pub fn create_rnums(descriptor: &Descriptor) -> String {
    format!(
        "CREATE TEMPORARY TABLE {} AS SELECT row_number() OVER (PARTITION BY 1) AS row_num, * FROM ({}) AS src",
        rnums_table(descriptor),
        staging_select_body(descriptor)
    )
}

/// Keep one row per primary key: the last one in warehouse row order.
pub fn dedupe_rnums(descriptor: &Descriptor) -> String {
    let rnums = rnums_table(descriptor);
    format!(
        "DELETE FROM {rnums} WHERE row_num NOT IN (SELECT MAX(row_num) FROM {rnums} GROUP BY {})",
        descriptor.pk_columns.join(", ")
    )
}

pub fn drop_row_num(descriptor: &Descriptor) -> String {
    format!("ALTER TABLE {} DROP COLUMN row_num", rnums_table(descriptor))
}

/// Upsert the deduplicated staging rows into the target. The `update_ts`
/// column, when present in full-columns, is stamped with getdate() in both
/// branches.
pub fn merge_from_rnums(descriptor: &Descriptor) -> String {
    let target = target_table(descriptor);
    let rnums = rnums_table(descriptor);

    let join = descriptor
        .pk_columns
        .iter()
        .map(|pk| {
            if descriptor.pk_nulls.contains(pk) {
                format!("COALESCE({target}.{pk},'') = COALESCE({rnums}.{pk},'')")
            } else {
                format!("{target}.{pk} = {rnums}.{pk}")
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    let updates = descriptor
        .full_columns
        .iter()
        .map(|column| {
            if column == "update_ts" {
                format!("{column} = getdate()")
            } else {
                format!("{column} = {rnums}.{column}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let insert_columns = descriptor.full_columns.join(", ");
    let insert_values = descriptor
        .full_columns
        .iter()
        .map(|column| {
            if column == "update_ts" {
                "getdate()".to_string()
            } else {
                format!("{rnums}.{column}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "MERGE INTO {target} USING {rnums} ON {join} \
         WHEN MATCHED THEN UPDATE SET {updates} \
         WHEN NOT MATCHED THEN INSERT ({insert_columns}) VALUES ({insert_values})"
    )
}

/// Delete target rows sharing null-hash keys with any staging row, whose
/// hash is NULL.
pub fn delete_null_hash(descriptor: &Descriptor) -> String {
    delete_null_hash_with_keys(descriptor, &NULL_HASH_KEYS)
}

pub fn delete_null_hash_customer(descriptor: &Descriptor) -> String {
    delete_null_hash_with_keys(descriptor, &NULL_HASH_CUSTOMER_KEYS)
}

fn delete_null_hash_with_keys(descriptor: &Descriptor, keys: &[&str]) -> String {
    let target = target_table(descriptor);
    let staging = staging_table(descriptor);

    let join = keys
        .iter()
        .map(|key| format!("{target}.{key} = {staging}.{key}"))
        .collect::<Vec<_>>()
        .join(" AND ");

    let mut statement =
        format!("DELETE FROM {target} USING {staging} WHERE {join} AND {target}.hash IS NULL");

    if !descriptor.delete_null_hash_merge_data_sources.is_empty() {
        let sources = descriptor
            .delete_null_hash_merge_data_sources
            .iter()
            .map(|source| format!("'{source}'"))
            .collect::<Vec<_>>()
            .join(", ");
        statement.push_str(&format!(" AND {target}.data_source IN ({sources})"));
    }

    statement
}

/// Insert staging rows whose keys do not already exist in the target.
pub fn append_from_staging(descriptor: &Descriptor) -> String {
    let target = target_table(descriptor);

    let anti_join = descriptor
        .pk_columns
        .iter()
        .map(|pk| format!("{target}.{pk} = src.{pk}"))
        .collect::<Vec<_>>()
        .join(" AND ");

    format!(
        "INSERT INTO {target} SELECT * FROM ({}) AS src \
         WHERE NOT EXISTS (SELECT 1 FROM {target} WHERE {anti_join})",
        staging_select_body(descriptor)
    )
}

/// Unconditional insert of the staging selection.
pub fn add_from_staging(descriptor: &Descriptor) -> String {
    format!(
        "INSERT INTO {} {}",
        target_table(descriptor),
        staging_select_body(descriptor)
    )
}
