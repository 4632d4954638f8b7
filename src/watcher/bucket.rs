//! Bucket-level directory discovery

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use object_store::{ObjectStore, path::Path};
use regex::Regex;
use tokio::sync::{mpsc, watch};

/// Polls the bucket for leaf directories matching the key pattern and emits
/// each newly appeared set on the new-directories channel. The known set
/// only grows; directories that later disappear keep their watchers.
pub struct BucketWatcher {
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl BucketWatcher {
    pub fn spawn(
        store: Arc<dyn ObjectStore>,
        key_pattern: Regex,
        poll_interval: Duration,
        new_directories: mpsc::Sender<BTreeSet<String>>,
    ) -> Self {
        let (stop, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut known: BTreeSet<String> = BTreeSet::new();

            loop {
                if *stop_rx.borrow() {
                    break;
                }

                match leaf_directories(store.as_ref()).await {
                    Ok(leaves) => {
                        let matching: BTreeSet<String> = leaves
                            .into_iter()
                            .filter(|directory| key_pattern.is_match(directory))
                            .collect();
                        let new: BTreeSet<String> =
                            matching.difference(&known).cloned().collect();

                        if !new.is_empty() {
                            log::info!(
                                "discovered {} new load directories: {new:?}",
                                new.len()
                            );
                            if new_directories.send(new.clone()).await.is_err() {
                                break;
                            }
                            known.extend(new);
                        }
                    }
                    Err(e) => log::warn!("failed to enumerate bucket directories: {e:#}"),
                }

                tokio::select! {
                    _ = stop_rx.changed() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            log::debug!("bucket watcher stopped");
        });

        Self { stop, handle }
    }

    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

/// Enumerate leaf directories: prefixes with objects but no sub-prefixes.
/// Repeated delimiter listings walk the hierarchy down to the leaves.
pub async fn leaf_directories(store: &dyn ObjectStore) -> Result<BTreeSet<String>> {
    let mut leaves = BTreeSet::new();
    let mut frontier: Vec<Option<Path>> = vec![None];

    while let Some(prefix) = frontier.pop() {
        let listing = store.list_with_delimiter(prefix.as_ref()).await?;

        if listing.common_prefixes.is_empty() {
            if let Some(prefix) = prefix {
                leaves.insert(format!("{prefix}/"));
            }
        } else {
            frontier.extend(listing.common_prefixes.into_iter().map(Some));
        }
    }

    Ok(leaves)
}
