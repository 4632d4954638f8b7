//! Directory discovery and watcher lifecycle, driven against an in-memory
//! object store.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use regex::Regex;
use tokio::sync::mpsc;

use blueshift::watcher::{BucketWatcher, KeyWatcherSpawner, WatcherContext, leaf_directories};

async fn seed(store: &InMemory, keys: &[&str]) {
    for key in keys {
        store
            .put(&Path::from(*key), PutPayload::from(b"x".to_vec()))
            .await
            .unwrap();
    }
}

fn dirs(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[tokio::test]
async fn test_bucket_watcher_emits_only_new_directories() {
    let store = Arc::new(InMemory::new());
    seed(
        &store,
        &[
            "prod/a/manifest.edn",
            "prod/a/one.gz",
            "prod/b/manifest.edn",
            "staging/ignored/file",
        ],
    )
    .await;

    let (tx, mut rx) = mpsc::channel::<BTreeSet<String>>(1);
    let watcher = BucketWatcher::spawn(
        store.clone(),
        Regex::new("prod/.*").unwrap(),
        Duration::from_millis(50),
        tx,
    );

    // First poll: everything matching is new.
    let first = rx.recv().await.expect("first emission");
    assert_eq!(first, dirs(&["prod/a/", "prod/b/"]));

    // A new directory appears; only it is emitted on a later poll.
    seed(&store, &["prod/c/manifest.edn"]).await;
    let second = rx.recv().await.expect("second emission");
    assert_eq!(second, dirs(&["prod/c/"]));

    watcher.stop().await;
}

#[tokio::test]
async fn test_bucket_watcher_ignores_non_matching_leaves() {
    let store = Arc::new(InMemory::new());
    seed(&store, &["staging/a/file", "other/b/file"]).await;

    let (tx, mut rx) = mpsc::channel::<BTreeSet<String>>(1);
    let watcher = BucketWatcher::spawn(
        store,
        Regex::new("prod/.*").unwrap(),
        Duration::from_millis(20),
        tx,
    );

    // Nothing matches, so nothing is ever emitted.
    let emitted = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(emitted.is_err());

    watcher.stop().await;
}

#[tokio::test]
async fn test_leaf_enumeration_descends_nested_prefixes() {
    let store = InMemory::new();
    seed(
        &store,
        &["prod/events/2024/06/a.gz", "prod/orders/manifest.edn"],
    )
    .await;

    let leaves = leaf_directories(&store).await.unwrap();
    assert_eq!(leaves, dirs(&["prod/events/2024/06/", "prod/orders/"]));
}

#[tokio::test]
async fn test_stopping_spawner_terminates_watchers() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
    let (tx, rx) = mpsc::channel::<BTreeSet<String>>(1);

    let spawner = KeyWatcherSpawner::spawn(
        WatcherContext {
            store,
            bucket: "b".to_string(),
            loader: Arc::new(stub::NeverLoader),
            status_db: None,
            metrics: blueshift::metrics::ImportMetrics::new(),
            // Long enough that a leaked watcher would hang the test.
            poll_interval: Duration::from_secs(3600),
            poll_jitter: Duration::ZERO,
        },
        rx,
    );

    tx.send(dirs(&["prod/a/", "prod/b/", "prod/c/"]))
        .await
        .unwrap();
    // Give the spawner a moment to start the watchers.
    tokio::time::sleep(Duration::from_millis(50)).await;

    tokio::time::timeout(Duration::from_secs(5), spawner.stop())
        .await
        .expect("spawner stop joins every watcher");
}

mod stub {
    use blueshift::descriptor::Descriptor;
    use blueshift::loader::{LoadError, TableLoader};

    /// Loader that must never be reached: the watched directories are empty.
    pub struct NeverLoader;

    #[async_trait::async_trait]
    impl TableLoader for NeverLoader {
        async fn load_table(
            &self,
            _descriptor: &Descriptor,
            _manifest_url: &str,
        ) -> Result<(), LoadError> {
            panic!("no load should happen in this test");
        }
    }
}
