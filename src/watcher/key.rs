//! Per-directory watcher

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use crate::state::{DirectoryCycle, LoadState};

/// Long-running task driving one directory's load cycles.
pub struct KeyWatcher {
    stop: watch::Sender<bool>,
    handle: tokio::task::JoinHandle<()>,
}

impl KeyWatcher {
    pub fn spawn(cycle: DirectoryCycle, poll_interval: Duration, poll_jitter: Duration) -> Self {
        let (stop, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut state = LoadState::Scan;
            loop {
                if *stop_rx.borrow() {
                    break;
                }

                let transition = cycle.advance(state).await;
                state = transition.state;

                if transition.pause {
                    tokio::select! {
                        _ = stop_rx.changed() => break,
                        _ = tokio::time::sleep(jittered(poll_interval, poll_jitter)) => {}
                    }
                }
            }
            log::debug!("watcher for {} stopped", cycle.directory());
        });

        Self { stop, handle }
    }

    /// Signal the watcher and wait for it to wind down.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.handle.await;
    }
}

/// Poll sleep with a fresh random jitter each iteration, so many watchers
/// started together drift apart instead of scanning in lockstep.
fn jittered(interval: Duration, jitter: Duration) -> Duration {
    let extra = jitter.as_secs_f64() * rand::thread_rng().gen_range(0.0..1.0);
    interval + Duration::from_secs_f64(extra)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_bounds() {
        let interval = Duration::from_secs(30);
        let jitter = Duration::from_secs(10);

        for _ in 0..100 {
            let sleep = jittered(interval, jitter);
            assert!(sleep >= interval);
            assert!(sleep < interval + jitter);
        }
    }

    #[test]
    fn test_zero_jitter() {
        let interval = Duration::from_secs(30);
        assert_eq!(jittered(interval, Duration::ZERO), interval);
    }
}
