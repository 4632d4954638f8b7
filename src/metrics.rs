//! Import metrics tracking
//!
//! Thread-safe counters, gauges and timers for load activity, shared
//! process-wide across all watchers.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Thread-safe metrics for tracking warehouse imports
#[derive(Debug, Clone, Default)]
pub struct ImportMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
    timeouts: AtomicUsize,
    imports: AtomicUsize,
    import_duration_ms: AtomicU64,
    open_connections: AtomicI64,
}

impl ImportMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed load transaction
    pub fn mark_commit(&self) {
        self.inner.commits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rolled-back load transaction
    pub fn mark_rollback(&self) {
        self.inner.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a statement that hit its execution timeout
    pub fn mark_timeout(&self) {
        self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed load attempt and its wall-clock duration
    pub fn record_import(&self, duration: Duration) {
        self.inner.imports.fetch_add(1, Ordering::Relaxed);
        self.inner
            .import_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.inner.open_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.inner.open_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn commits(&self) -> usize {
        self.inner.commits.load(Ordering::Relaxed)
    }

    pub fn rollbacks(&self) -> usize {
        self.inner.rollbacks.load(Ordering::Relaxed)
    }

    pub fn timeouts(&self) -> usize {
        self.inner.timeouts.load(Ordering::Relaxed)
    }

    pub fn imports(&self) -> usize {
        self.inner.imports.load(Ordering::Relaxed)
    }

    /// Current number of open warehouse connections
    pub fn open_connections(&self) -> i64 {
        self.inner.open_connections.load(Ordering::Relaxed)
    }

    /// Average import duration across completed attempts
    pub fn avg_import_ms(&self) -> f64 {
        let total = self.inner.import_duration_ms.load(Ordering::Relaxed) as f64;
        let imports = self.imports() as f64;

        if imports > 0.0 { total / imports } else { 0.0 }
    }

    /// Log a one-line summary of all meters
    pub fn log_summary(&self) {
        log::info!(
            "imports: {} total, {} committed, {} rolled back, {} timed out, avg {:.1}ms, {} connections open",
            self.imports(),
            self.commits(),
            self.rollbacks(),
            self.timeouts(),
            self.avg_import_ms(),
            self.open_connections()
        );
    }
}
