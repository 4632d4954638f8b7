//! Per-directory load state machine
//!
//! Each watched directory moves through one ingestion cycle at a time:
//! scan finds a descriptor and matching data files, load ingests them
//! through the strategy loader, delete cleans up the sources, and the
//! stl-load-error branch quarantines files the warehouse rejected. Every
//! failure path returns the directory to scan after the poll interval;
//! failures in one directory never affect another.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::TryStreamExt;
use object_store::{ObjectStore, path::Path};

use crate::copy_manifest::{self, CopyManifest};
use crate::descriptor::{Descriptor, Strategy};
use crate::loader::{self, TableLoader};
use crate::metrics::ImportMetrics;
use crate::status::{FileStatus, StatusDb};
use crate::warehouse::Warehouse;

pub const DESCRIPTOR_SUFFIX: &str = "manifest.edn";

/// Where a directory is within its current ingestion cycle.
#[derive(Debug)]
pub enum LoadState {
    Scan,
    Load {
        descriptor: Descriptor,
        files: Vec<String>,
    },
    Delete {
        files: Vec<String>,
    },
    StlLoadError {
        descriptor: Descriptor,
        files: Vec<String>,
    },
}

/// Next state plus whether the watcher should sleep before re-entering.
#[derive(Debug)]
pub struct Transition {
    pub state: LoadState,
    pub pause: bool,
}

impl Transition {
    fn pause(state: LoadState) -> Self {
        Self { state, pause: true }
    }

    fn immediate(state: LoadState) -> Self {
        Self {
            state,
            pause: false,
        }
    }
}

/// Drives one directory's state machine. Owned by a single KeyWatcher.
pub struct DirectoryCycle {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    directory: String,
    loader: Arc<dyn TableLoader>,
    status_db: Option<StatusDb>,
    metrics: ImportMetrics,
}

impl DirectoryCycle {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: String,
        directory: String,
        loader: Arc<dyn TableLoader>,
        status_db: Option<StatusDb>,
        metrics: ImportMetrics,
    ) -> Self {
        Self {
            store,
            bucket,
            directory: directory.trim_matches('/').to_string(),
            loader,
            status_db,
            metrics,
        }
    }

    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// Advance the state machine by one step.
    pub async fn advance(&self, state: LoadState) -> Transition {
        match state {
            LoadState::Scan => self.scan().await,
            LoadState::Load { descriptor, files } => self.load(descriptor, files).await,
            LoadState::Delete { files } => self.delete(files).await,
            LoadState::StlLoadError { descriptor, files } => {
                self.stl_load_error(descriptor, files).await
            }
        }
    }

    async fn scan(&self) -> Transition {
        let prefix = Path::from(self.directory.as_str());
        let objects: Vec<_> = match self.store.list(Some(&prefix)).try_collect().await {
            Ok(objects) => objects,
            Err(e) => {
                log::warn!("failed to list {}: {e}", self.directory);
                return Transition::pause(LoadState::Scan);
            }
        };

        let mut keys: Vec<String> = objects
            .iter()
            .map(|meta| meta.location.to_string())
            .collect();
        keys.sort();

        let Some(descriptor_key) = keys.iter().find(|key| key.ends_with(DESCRIPTOR_SUFFIX)) else {
            return Transition::pause(LoadState::Scan);
        };

        let descriptor = match self.fetch_descriptor(descriptor_key).await {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log::error!(
                    "invalid descriptor directory={} key={descriptor_key} error={e:#}",
                    self.directory
                );
                return Transition::pause(LoadState::Scan);
            }
        };

        let mut files: Vec<String> = keys
            .iter()
            .filter(|key| *key != descriptor_key && descriptor.data_pattern.is_match(key))
            .cloned()
            .collect();

        if files.is_empty() {
            return Transition::pause(LoadState::Scan);
        }

        // A merge load handles one file per cycle; later files wait for the
        // next scan.
        if descriptor.strategy == Strategy::Merge {
            files.truncate(1);
        }

        log::info!(
            "directory {} has {} file(s) to load into {}",
            self.directory,
            files.len(),
            descriptor.table
        );
        Transition::immediate(LoadState::Load { descriptor, files })
    }

    async fn fetch_descriptor(&self, key: &str) -> anyhow::Result<Descriptor> {
        let body = self
            .store
            .get(&Path::from(key))
            .await?
            .bytes()
            .await?;
        let text = std::str::from_utf8(&body)?;
        Ok(Descriptor::parse(text)?)
    }

    async fn load(&self, descriptor: Descriptor, files: Vec<String>) -> Transition {
        let manifest = CopyManifest::for_keys(&self.bucket, &files);
        let uploaded =
            match copy_manifest::put_manifest(self.store.as_ref(), &self.bucket, &manifest).await {
                Ok(uploaded) => uploaded,
                Err(e) => {
                    log::error!(
                        "failed to upload COPY manifest for {}: {e:#}",
                        self.directory
                    );
                    return Transition::pause(LoadState::Scan);
                }
            };

        self.stamp(&descriptor, &files, FileStatus::Processing).await;

        let started = Instant::now();
        let result = self.loader.load_table(&descriptor, &uploaded.url).await;
        self.metrics.record_import(started.elapsed());

        match result {
            Ok(()) => {
                copy_manifest::delete_manifest(self.store.as_ref(), &uploaded).await;
                self.stamp(&descriptor, &files, FileStatus::Upserted).await;
                log::info!(
                    "loaded {} file(s) from {} into {}",
                    files.len(),
                    self.directory,
                    descriptor.table
                );
                Transition::pause(LoadState::Delete { files })
            }
            Err(e) => {
                // A timed-out statement may still be reading the manifest
                // object, so it is left in place on that path.
                if !e.is_timeout() {
                    copy_manifest::delete_manifest(self.store.as_ref(), &uploaded).await;
                }
                self.stamp(&descriptor, &files, FileStatus::Failed).await;

                let text = error_chain_text(&e);
                log::error!("load failed directory={} error={text}", self.directory);

                if text.contains("stl_load_errors") {
                    Transition::pause(LoadState::StlLoadError { descriptor, files })
                } else {
                    Transition::pause(LoadState::Scan)
                }
            }
        }
    }

    async fn delete(&self, files: Vec<String>) -> Transition {
        for file in &files {
            if let Err(e) = self.store.delete(&Path::from(file.as_str())).await {
                log::warn!("failed to delete {file}: {e}");
            }
        }
        Transition::pause(LoadState::Scan)
    }

    /// Move files the warehouse rejected into a dated errors/ prefix so the
    /// directory can make progress on the next cycle.
    async fn stl_load_error(&self, descriptor: Descriptor, files: Vec<String>) -> Transition {
        if let Err(e) = self.quarantine_rejected_files(&descriptor, &files).await {
            log::error!(
                "failed to handle load errors for {}: {e:#}",
                self.directory
            );
        }
        Transition::pause(LoadState::Scan)
    }

    async fn quarantine_rejected_files(
        &self,
        descriptor: &Descriptor,
        files: &[String],
    ) -> anyhow::Result<()> {
        let descriptor = loader::apply_templates(descriptor)?;
        let warehouse = Warehouse::connect(
            &descriptor.jdbc_url,
            &descriptor.username,
            &descriptor.password,
            self.metrics.clone(),
        )
        .await?;

        let file_urls: Vec<String> = files
            .iter()
            .map(|key| format!("s3://{}/{key}", self.bucket))
            .collect();
        let rows = warehouse.recent_load_errors(&file_urls).await?;

        for row in rows {
            let Some((source, destination)) = error_destination(&self.bucket, &row.filename)
            else {
                log::warn!("load error for unknown file {}", row.filename);
                continue;
            };

            let source = Path::from(source);
            if self.store.head(&source).await.is_err() {
                continue;
            }
            self.store.copy(&source, &Path::from(destination.as_str())).await?;
            self.store.delete(&source).await?;

            log::error!(
                "moved rejected file file={} destination={destination} line_number={} colname={} err_reason={}",
                row.filename,
                row.line_number,
                row.colname.trim(),
                row.err_reason.trim()
            );
        }
        Ok(())
    }

    async fn stamp(&self, descriptor: &Descriptor, files: &[String], status: FileStatus) {
        if !descriptor.add_status {
            return;
        }
        let Some(status_db) = &self.status_db else {
            return;
        };

        for file in files {
            let filename = basename(file);
            if let Err(e) = status_db.update_status(filename, status).await {
                log::warn!("failed to stamp {filename} as {}: {e:#}", status.as_str());
            }
        }
    }
}

/// Quarantine location for a rejected file: `errors/YYYY-MM-DD/<basename>`.
/// Returns the source key alongside; None when the error row references an
/// object outside the watched bucket.
pub fn error_destination(bucket: &str, file_url: &str) -> Option<(String, String)> {
    let key = file_url.strip_prefix(&format!("s3://{bucket}/"))?;
    let destination = format!("errors/{}/{}", Utc::now().format("%Y-%m-%d"), basename(key));
    Some((key.to_string(), destination))
}

fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Render an error with its full source chain, so markers like
/// `stl_load_errors` buried in driver messages stay visible.
fn error_chain_text(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
