//! Cancellation signals for in-flight runs.
//!
//! One watch channel per claimed schedule. Disabling, deleting, or
//! revoking approval on a schedule fires its signal; the runner checks it
//! at every suspension point and records the run as `cancelled` (never
//! `failed` — that status is reserved for internal faults).

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

/// Registry of live cancellation channels, keyed by schedule id.
#[derive(Default)]
pub struct CancelRegistry {
    runs: DashMap<String, watch::Sender<bool>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly claimed run and get its cancellation receiver.
    ///
    /// A leftover entry for the same schedule (crashed task) is replaced;
    /// the old receiver observes the drop and the stale-recovery path
    /// settles its record.
    pub fn register(&self, schedule_id: &str) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.runs.insert(schedule_id.to_string(), tx);
        rx
    }

    /// Fire the cancellation signal for a schedule's in-flight run, if any.
    /// Returns `true` when a live run was signalled.
    pub fn cancel(&self, schedule_id: &str) -> bool {
        match self.runs.get(schedule_id) {
            Some(entry) => {
                debug!(schedule_id = %schedule_id, "cancellation signalled");
                entry.send(true).is_ok()
            }
            None => false,
        }
    }

    /// Drop the channel once its run reached a terminal status.
    pub fn complete(&self, schedule_id: &str) {
        self.runs.remove(schedule_id);
    }

    /// Number of currently registered runs (for observability).
    pub fn in_flight(&self) -> usize {
        self.runs.len()
    }
}
