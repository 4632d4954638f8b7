//! Warehouse COPY manifest
//!
//! The warehouse's bulk COPY reads a JSON manifest listing the objects to
//! ingest. Each load cycle uploads one under a fresh UUID-based key and
//! deletes it once the cycle terminates.

use anyhow::{Context, Result};
use object_store::{ObjectStore, path::Path};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct CopyManifest {
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Serialize)]
pub struct ManifestEntry {
    pub url: String,
    pub mandatory: bool,
}

impl CopyManifest {
    /// Manifest for the given object keys within `bucket`. Every entry is
    /// mandatory: a missing data file must fail the COPY.
    pub fn for_keys(bucket: &str, keys: &[String]) -> Self {
        Self {
            entries: keys
                .iter()
                .map(|key| ManifestEntry {
                    url: format!("s3://{bucket}/{key}"),
                    mandatory: true,
                })
                .collect(),
        }
    }
}

/// Handle to an uploaded manifest object.
#[derive(Debug, Clone)]
pub struct UploadedManifest {
    pub key: String,
    pub url: String,
}

/// Serialize and upload a COPY manifest under a fresh `<uuid>.manifest` key.
pub async fn put_manifest(
    store: &dyn ObjectStore,
    bucket: &str,
    manifest: &CopyManifest,
) -> Result<UploadedManifest> {
    let key = format!("{}.manifest", Uuid::new_v4());
    let body = serde_json::to_vec(manifest).context("failed to serialize COPY manifest")?;

    store
        .put(&Path::from(key.as_str()), body.into())
        .await
        .with_context(|| format!("failed to upload COPY manifest {key}"))?;

    let url = format!("s3://{bucket}/{key}");
    Ok(UploadedManifest { key, url })
}

/// Best-effort removal of an uploaded manifest object.
pub async fn delete_manifest(store: &dyn ObjectStore, uploaded: &UploadedManifest) {
    if let Err(e) = store.delete(&Path::from(uploaded.key.as_str())).await {
        log::warn!("failed to delete COPY manifest {}: {e}", uploaded.key);
    }
}
