use crate::services::staging::StagingArea;
use crate::utils::keyed_mutex::KeyedMutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Periodically removes staging leftovers that no owner released, e.g. after
/// a crash mid-request.
pub struct BackgroundWorker {
    staging: Arc<StagingArea>,
    max_age: Duration,
    interval: Duration,
    locks: Option<KeyedMutex>,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        staging: Arc<StagingArea>,
        max_age: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            staging,
            max_age,
            interval: Duration::from_secs(3600),
            locks: None,
            shutdown,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Also drop idle entries from this lock table on every sweep.
    pub fn with_locks(mut self, locks: KeyedMutex) -> Self {
        self.locks = Some(locks);
        self
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Background worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Background worker shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.perform_cleanup().await;
                }
            }
        }
    }

    pub async fn perform_cleanup(&self) -> usize {
        tracing::debug!("🧹 Sweeping staging area {}", self.staging.root().display());

        let removed = self.staging.purge_stale(self.max_age).await;
        if removed > 0 {
            tracing::info!("🧹 Removed {} stale staging entries", removed);
        }

        if let Some(locks) = &self.locks {
            locks.cleanup();
        }
        removed
    }
}
