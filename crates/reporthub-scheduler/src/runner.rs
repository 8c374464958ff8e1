//! Drives one claimed execution from `pending` to a terminal status.
//!
//! The runner owns the policy around the external query engine: a hard
//! wall-clock timeout, cancellation at every suspension point, and the
//! mapping of outcomes onto the execution record. Internal faults become
//! `failed`; only an externally requested abort becomes `cancelled`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use reporthub_core::clock::Clock;
use reporthub_core::external::QueryExecutor;
use reporthub_store::types::{Recipient, Schedule};

use crate::error::Result;
use crate::ledger::{ExecutionLedger, ExecutionRecord, ExecutionStatus};
use crate::notifier::Notifier;

pub struct ExecutionRunner {
    executor: Arc<dyn QueryExecutor>,
    notifier: Notifier,
    ledger: Arc<ExecutionLedger>,
    clock: Arc<dyn Clock>,
    /// Maximum wall-clock duration for the query-engine call.
    timeout: Duration,
}

impl ExecutionRunner {
    pub fn new(
        executor: Arc<dyn QueryExecutor>,
        notifier: Notifier,
        ledger: Arc<ExecutionLedger>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
    ) -> Self {
        Self {
            executor,
            notifier,
            ledger,
            clock,
            timeout,
        }
    }

    /// Execute one claimed run and return its terminal record.
    ///
    /// Never returns an "execution failed" error — faults are recorded on
    /// the ledger and the loop moves on; only infrastructure errors (the
    /// ledger itself being unusable) propagate.
    pub async fn run(
        &self,
        schedule: &Schedule,
        recipients: &[Recipient],
        record: &ExecutionRecord,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<ExecutionRecord> {
        if !self.ledger.mark_running(&record.id)? {
            // Claimed but already settled elsewhere (stale recovery won the
            // race). Nothing to do.
            warn!(execution_id = %record.id, "run skipped: record no longer pending");
            return self.ledger.get(&record.id);
        }
        info!(
            schedule_id = %schedule.id,
            execution_id = %record.id,
            report_id = %schedule.report_id,
            "execution started"
        );

        tokio::select! {
            produced = tokio::time::timeout(self.timeout, self.executor.execute(&schedule.report_id)) => {
                match produced {
                    Ok(Ok(payload)) => {
                        let outcome = self
                            .notifier
                            .dispatch(schedule, &payload, recipients, &cancel)
                            .await;
                        let (status, message) = if outcome.aborted {
                            (ExecutionStatus::Cancelled, Some("cancelled during delivery"))
                        } else {
                            (ExecutionStatus::Completed, None)
                        };
                        self.ledger.finish(
                            &record.id,
                            status,
                            self.clock.now(),
                            outcome.stats.sent,
                            outcome.stats.failed,
                            message,
                        )?;
                    }
                    Ok(Err(e)) => {
                        warn!(execution_id = %record.id, error = %e, "query engine reported failure");
                        self.fail(&record.id, &e.to_string())?;
                    }
                    Err(_) => {
                        let message = format!(
                            "query execution timed out after {}s",
                            self.timeout.as_secs()
                        );
                        warn!(execution_id = %record.id, "{message}");
                        self.fail(&record.id, &message)?;
                    }
                }
            }
            // Externally requested abort (schedule disabled/deleted or
            // approval revoked). A closed channel counts too: the claim's
            // owner is gone, so proceeding would be unsupervised.
            _ = cancel.changed() => {
                info!(execution_id = %record.id, "execution cancelled");
                self.ledger.finish(
                    &record.id,
                    ExecutionStatus::Cancelled,
                    self.clock.now(),
                    0,
                    0,
                    Some("execution cancelled"),
                )?;
            }
        }

        self.ledger.get(&record.id)
    }

    fn fail(&self, execution_id: &str, message: &str) -> Result<()> {
        self.ledger.finish(
            execution_id,
            ExecutionStatus::Failed,
            self.clock.now(),
            0,
            0,
            Some(message),
        )?;
        Ok(())
    }
}
