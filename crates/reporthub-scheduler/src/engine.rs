//! Polling loop that turns due schedules into executions.
//!
//! Every poll cycle: recover abandoned records, load the due batch, claim
//! each schedule, and spawn a task per won claim. Rescheduling happens
//! after the run terminates, anchored on the instant the run was *for*
//! (not on when it finished), so a backlogged schedule catches up one
//! occurrence per cycle instead of silently skipping ahead.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use reporthub_core::clock::Clock;
use reporthub_core::config::SchedulerConfig;
use reporthub_store::recurrence::next_due;
use reporthub_store::{Schedule, ScheduleStore};

use crate::cancel::CancelRegistry;
use crate::claim::{ClaimOutcome, ScheduleClaimer};
use crate::error::Result;
use crate::ledger::ExecutionLedger;
use crate::runner::ExecutionRunner;

pub struct SchedulerEngine {
    store: Arc<ScheduleStore>,
    ledger: Arc<ExecutionLedger>,
    claimer: ScheduleClaimer,
    runner: Arc<ExecutionRunner>,
    cancels: Arc<CancelRegistry>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    stale_after: Duration,
    batch_size: u32,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<ScheduleStore>,
        ledger: Arc<ExecutionLedger>,
        runner: Arc<ExecutionRunner>,
        cancels: Arc<CancelRegistry>,
        clock: Arc<dyn Clock>,
        config: &SchedulerConfig,
    ) -> Self {
        let claimer = ScheduleClaimer::new(&ledger);
        Self {
            store,
            ledger,
            claimer,
            runner,
            cancels,
            clock,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            stale_after: Duration::from_secs(config.stale_after_secs),
            batch_size: config.batch_size,
        }
    }

    /// Main loop. Polls every `poll_interval` until `shutdown` broadcasts
    /// `true`. Spawned runs are detached; on shutdown they settle via
    /// cancellation or, after a crash, via stale recovery on next start.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval_secs = self.poll_interval.as_secs(),
            batch_size = self.batch_size,
            "scheduler engine started"
        );
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!("scheduler tick error: {e}");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One poll cycle. Returns the handles of the runs it spawned so tests
    /// can await them; the loop itself never joins them.
    pub fn tick(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        let now = self.clock.now();

        let cutoff = now - chrono::Duration::from_std(self.stale_after).unwrap_or_default();
        let recovered = self.ledger.recover_stale(cutoff, now)?;
        if recovered > 0 {
            warn!(count = recovered, "abandoned executions recovered");
        }

        let due = self.store.due_schedules(now, self.batch_size)?;
        let mut spawned = Vec::new();
        for schedule in due {
            let id = schedule.id.clone();
            // One broken candidate must not abandon the rest of the batch.
            match self.start_due(schedule, now) {
                Ok(Some(handle)) => spawned.push(handle),
                Ok(None) => {}
                Err(e) => error!(schedule_id = %id, "due schedule skipped: {e}"),
            }
        }
        Ok(spawned)
    }

    /// Claim one due schedule and spawn its run. `None` when another
    /// claimer owns the instant or the schedule stopped being due.
    fn start_due(
        self: &Arc<Self>,
        schedule: Schedule,
        now: DateTime<Utc>,
    ) -> Result<Option<JoinHandle<()>>> {
        // Fetched before the claim so a recipient-lookup fault leaves the
        // schedule unclaimed and retryable next cycle.
        let recipients = self.store.recipients_for(&schedule.id)?;
        let record = match self.claimer.try_claim(&schedule, now)? {
            ClaimOutcome::Claimed(record) => record,
            ClaimOutcome::AlreadyClaimed => {
                debug!(schedule_id = %schedule.id, "due schedule already claimed");
                return Ok(None);
            }
            ClaimOutcome::NotDue => return Ok(None),
        };
        let cancel_rx = self.cancels.register(&schedule.id);
        let engine = Arc::clone(self);
        Ok(Some(tokio::spawn(async move {
            let result = engine
                .runner
                .run(&schedule, &recipients, &record, cancel_rx)
                .await;
            engine.cancels.complete(&schedule.id);
            match result {
                Ok(done) => engine.reschedule(&schedule, done.scheduled_for),
                Err(e) => {
                    // Record stays pending; stale recovery will settle it
                    // and free the schedule.
                    error!(schedule_id = %schedule.id, "run infrastructure error: {e}");
                }
            }
        })))
    }

    /// Plan the next occurrence after a run settled. Anchored on the
    /// instant the finished run was scheduled for. The store applies the
    /// plan only while the schedule is still runnable, so a disable,
    /// delete, or revocation landing mid-run wins regardless of ordering.
    fn reschedule(&self, schedule: &Schedule, anchor: DateTime<Utc>) {
        let next = next_due(&schedule.recurrence, anchor);
        match self.store.plan_next_run(&schedule.id, next) {
            Ok(true) => info!(schedule_id = %schedule.id, next = ?next, "next run planned"),
            Ok(false) => {
                debug!(schedule_id = %schedule.id, "schedule no longer runnable; not rescheduled")
            }
            Err(e) => error!(schedule_id = %schedule.id, "reschedule failed: {e}"),
        }
    }
}
