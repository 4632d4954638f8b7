//! Object store construction
//!
//! The watched bucket is reached through the object_store crate. Credentials,
//! region and any custom endpoint come from the standard AWS environment
//! variables, matching how COPY credentials are resolved.

use std::sync::Arc;

use anyhow::{Context, Result};
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;

/// Create an object store client for the configured bucket.
pub fn bucket_store(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    if bucket.is_empty() {
        anyhow::bail!("s3.bucket cannot be empty");
    }

    let store = AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .build()
        .with_context(|| format!("failed to create object store for bucket {bucket}"))?;
    Ok(Arc::new(store))
}
