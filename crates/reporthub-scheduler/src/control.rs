//! Enable/disable and removal with in-flight cancellation.
//!
//! Disabling or soft-deleting a schedule must stop a run that is already
//! in flight, not only future ones. The store mutation clears
//! `next_run_at`; this layer additionally fires the schedule's
//! cancellation signal so the runner settles the record as `cancelled`
//! instead of delivering a report nobody asked to keep.

use std::sync::Arc;

use tracing::info;

use reporthub_store::{Schedule, ScheduleStore};

use crate::cancel::CancelRegistry;
use crate::error::Result;

pub struct ScheduleControl {
    store: Arc<ScheduleStore>,
    cancels: Arc<CancelRegistry>,
}

impl ScheduleControl {
    pub fn new(store: Arc<ScheduleStore>, cancels: Arc<CancelRegistry>) -> Self {
        Self { store, cancels }
    }

    /// Enable or disable a schedule. Disabling aborts an in-flight run.
    pub fn set_enabled(&self, schedule_id: &str, actor: &str, enabled: bool) -> Result<Schedule> {
        let schedule = self.store.set_enabled(schedule_id, actor, enabled)?;
        if !enabled && self.cancels.cancel(schedule_id) {
            info!(schedule_id = %schedule_id, "in-flight run cancelled on disable");
        }
        Ok(schedule)
    }

    /// Soft-delete a schedule and abort its in-flight run, if any.
    pub fn remove(&self, schedule_id: &str, actor: &str) -> Result<()> {
        self.store.remove(schedule_id, actor)?;
        if self.cancels.cancel(schedule_id) {
            info!(schedule_id = %schedule_id, "in-flight run cancelled on removal");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use rusqlite::Connection;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use reporthub_core::clock::FixedClock;
    use reporthub_core::external::{
        CapabilityCheck, DirectoryError, EmailTransport, ExecuteError, QueryExecutor,
        ReportPayload, SendError, TenantDirectory,
    };
    use reporthub_store::types::{EmailSecurityLevel, Frequency, NewSchedule, Recurrence, TimeOfDay};
    use reporthub_store::StoreError;

    use crate::claim::{ClaimOutcome, ScheduleClaimer};
    use crate::ledger::{ExecutionLedger, ExecutionStatus};
    use crate::notifier::Notifier;
    use crate::runner::ExecutionRunner;

    struct AllowAll;
    impl CapabilityCheck for AllowAll {
        fn can_schedule_reports(&self, _user_id: &str, _tenant_id: &str) -> bool {
            true
        }
    }

    /// Query engine that never answers, so the run stays in flight until
    /// something cancels it.
    struct HangingExecutor;

    #[async_trait]
    impl QueryExecutor for HangingExecutor {
        async fn execute(&self, _report_id: &str) -> std::result::Result<ReportPayload, ExecuteError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    struct RecordingTransport {
        sent_to: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmailTransport for RecordingTransport {
        async fn send(
            &self,
            to: &str,
            _subject: &str,
            _payload: &ReportPayload,
        ) -> std::result::Result<(), SendError> {
            self.sent_to.lock().unwrap().push(to.to_string());
            Ok(())
        }
    }

    struct OpenDirectory;

    #[async_trait]
    impl TenantDirectory for OpenDirectory {
        async fn allowed_domains(
            &self,
            _tenant_id: &str,
        ) -> std::result::Result<HashSet<String>, DirectoryError> {
            Ok(HashSet::new())
        }
    }

    fn utc(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 10, h, m, 0).unwrap()
    }

    struct Harness {
        control: ScheduleControl,
        store: Arc<ScheduleStore>,
        ledger: Arc<ExecutionLedger>,
        claimer: ScheduleClaimer,
        cancels: Arc<CancelRegistry>,
        transport: Arc<RecordingTransport>,
    }

    fn harness(name: &str) -> Harness {
        let uri = format!("file:{name}?mode=memory&cache=shared");
        let store_conn = Connection::open(&uri).unwrap();
        let engine_conn = Connection::open(&uri).unwrap();
        reporthub_store::db::init_db(&store_conn).unwrap();
        crate::db::init_db(&engine_conn).unwrap();

        let clock = Arc::new(FixedClock::new(utc(7, 0)));
        let store = Arc::new(ScheduleStore::new(store_conn, Arc::new(AllowAll), clock));
        let ledger = Arc::new(ExecutionLedger::new(engine_conn));
        let claimer = ScheduleClaimer::new(&ledger);
        let cancels = Arc::new(CancelRegistry::new());
        let transport = Arc::new(RecordingTransport {
            sent_to: Mutex::new(Vec::new()),
        });
        Harness {
            control: ScheduleControl::new(store.clone(), cancels.clone()),
            store,
            ledger,
            claimer,
            cancels,
            transport,
        }
    }

    fn daily_schedule(store: &ScheduleStore) -> Schedule {
        let created = store
            .create(NewSchedule {
                tenant_id: "acme".into(),
                report_id: "rep-1".into(),
                name: "Daily revenue".into(),
                recurrence: Recurrence {
                    frequency: Frequency::Daily,
                    at: TimeOfDay::new(9, 0),
                    timezone: chrono_tz::UTC,
                    day_of_week: None,
                    day_of_month: None,
                },
                requires_approval: false,
                email_security_level: EmailSecurityLevel::Unrestricted,
                created_by: "u-1".into(),
            })
            .unwrap();
        store
            .add_recipient(&created.id, "u-1", "ana@acme.com")
            .unwrap();
        created
    }

    /// Claim the schedule's due run and start it against the hanging
    /// executor, returning the task driving it.
    fn start_run(
        h: &Harness,
        schedule: &Schedule,
    ) -> tokio::task::JoinHandle<crate::error::Result<crate::ledger::ExecutionRecord>> {
        let record = match h.claimer.try_claim(schedule, utc(9, 1)).unwrap() {
            ClaimOutcome::Claimed(r) => r,
            other => panic!("expected Claimed, got {other:?}"),
        };
        let cancel_rx = h.cancels.register(&schedule.id);
        let recipients = h.store.recipients_for(&schedule.id).unwrap();
        let runner = ExecutionRunner::new(
            Arc::new(HangingExecutor),
            Notifier::new(h.transport.clone(), Arc::new(OpenDirectory)),
            h.ledger.clone(),
            Arc::new(FixedClock::new(utc(9, 1))),
            Duration::from_secs(60),
        );
        let schedule = schedule.clone();
        tokio::spawn(async move {
            runner
                .run(&schedule, &recipients, &record, cancel_rx)
                .await
        })
    }

    #[tokio::test]
    async fn disable_aborts_in_flight_run() {
        let h = harness("control_disable");
        let s = daily_schedule(&h.store);
        let task = start_run(&h, &s);
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.control.set_enabled(&s.id, "u-1", false).unwrap();

        let done = task.await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Cancelled);
        assert_eq!(done.emails_sent, 0);
        assert!(h.transport.sent_to.lock().unwrap().is_empty());
        assert!(h.store.get(&s.id).unwrap().next_run_at.is_none());
    }

    #[tokio::test]
    async fn removal_aborts_in_flight_run() {
        let h = harness("control_remove");
        let s = daily_schedule(&h.store);
        let task = start_run(&h, &s);
        tokio::time::sleep(Duration::from_millis(10)).await;

        h.control.remove(&s.id, "u-1").unwrap();

        let done = task.await.unwrap().unwrap();
        assert_eq!(done.status, ExecutionStatus::Cancelled);
        assert_eq!(done.emails_sent, 0);
        assert!(h.transport.sent_to.lock().unwrap().is_empty());
        assert!(matches!(
            h.store.get(&s.id),
            Err(StoreError::ScheduleNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn disable_without_in_flight_run_is_quiet() {
        let h = harness("control_idle");
        let s = daily_schedule(&h.store);
        // No run registered: the store toggle works, nothing to signal.
        let disabled = h.control.set_enabled(&s.id, "u-1", false).unwrap();
        assert!(!disabled.is_enabled);
        assert!(disabled.next_run_at.is_none());
        assert_eq!(h.cancels.in_flight(), 0);
        assert!(h.ledger.for_schedule(&s.id, 10).unwrap().is_empty());
    }
}
