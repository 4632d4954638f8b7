//! KeyWatcher lifecycle management

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use object_store::ObjectStore;
use tokio::sync::{mpsc, watch};

use crate::loader::TableLoader;
use crate::metrics::ImportMetrics;
use crate::state::DirectoryCycle;
use crate::status::StatusDb;
use crate::watcher::KeyWatcher;

/// Everything a KeyWatcher needs, shared across all of them.
#[derive(Clone)]
pub struct WatcherContext {
    pub store: Arc<dyn ObjectStore>,
    pub bucket: String,
    pub loader: Arc<dyn TableLoader>,
    pub status_db: Option<StatusDb>,
    pub metrics: ImportMetrics,
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
}

/// Consumes newly discovered directories and runs one KeyWatcher per
/// directory. Owns every watcher it starts; stopping the spawner stops
/// them all.
pub struct KeyWatcherSpawner {
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<Vec<KeyWatcher>>,
}

impl KeyWatcherSpawner {
    pub fn spawn(
        context: WatcherContext,
        mut new_directories: mpsc::Receiver<BTreeSet<String>>,
    ) -> Self {
        let (stop, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut watchers: Vec<KeyWatcher> = Vec::new();

            loop {
                tokio::select! {
                    _ = stop_rx.changed() => break,
                    batch = new_directories.recv() => match batch {
                        Some(directories) => {
                            for directory in directories {
                                log::info!("starting watcher for {directory}");
                                let cycle = DirectoryCycle::new(
                                    context.store.clone(),
                                    context.bucket.clone(),
                                    directory,
                                    context.loader.clone(),
                                    context.status_db.clone(),
                                    context.metrics.clone(),
                                );
                                watchers.push(KeyWatcher::spawn(
                                    cycle,
                                    context.poll_interval,
                                    context.poll_jitter,
                                ));
                            }
                        }
                        None => break,
                    }
                }
            }

            watchers
        });

        Self { stop, handle }
    }

    /// Stop the spawner and every watcher it started.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Ok(watchers) = self.handle.await {
            for watcher in watchers {
                watcher.stop().await;
            }
        }
    }
}
