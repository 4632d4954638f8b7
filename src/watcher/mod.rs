//! Watcher hierarchy
//!
//! A BucketWatcher enumerates matching leaf directories and announces new
//! ones; the KeyWatcherSpawner starts one KeyWatcher per directory; each
//! KeyWatcher drives its directory's load state machine between jittered
//! poll sleeps. All three are long-lived tokio tasks stopped through
//! control channels.

mod bucket;
mod key;
mod spawner;

pub use bucket::{BucketWatcher, leaf_directories};
pub use key::KeyWatcher;
pub use spawner::{KeyWatcherSpawner, WatcherContext};
