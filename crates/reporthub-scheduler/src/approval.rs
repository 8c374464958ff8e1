//! Approval gating for schedules that require sign-off.
//!
//! draft → pending_approval → approved, one way; revocation drops an
//! approved schedule back to pending_approval. Every transition is a
//! conditional UPDATE in the store, so concurrent actors cannot both win.
//! Revocation also clears the planned run and fires the cancellation
//! signal — a claim computed under the old approval must not proceed.

use std::sync::Arc;

use tracing::info;

use reporthub_core::clock::Clock;
use reporthub_store::recurrence::next_due;
use reporthub_store::{Schedule, ScheduleStore};

use crate::cancel::CancelRegistry;
use crate::error::{Result, SchedulerError};

pub struct ApprovalGate {
    store: Arc<ScheduleStore>,
    cancels: Arc<CancelRegistry>,
    clock: Arc<dyn Clock>,
}

impl ApprovalGate {
    pub fn new(
        store: Arc<ScheduleStore>,
        cancels: Arc<CancelRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            cancels,
            clock,
        }
    }

    /// draft → pending_approval.
    pub fn submit(&self, schedule_id: &str) -> Result<()> {
        if !self.store.submit_for_approval(schedule_id)? {
            return Err(self.wrong_state(schedule_id, "only draft schedules can be submitted"));
        }
        info!(schedule_id = %schedule_id, "schedule submitted for approval");
        Ok(())
    }

    /// pending_approval → approved, recording the approver and seeding the
    /// first planned run (only if the schedule is enabled — a disabled
    /// schedule stays approved-but-unplanned until re-enabled).
    pub fn approve(&self, schedule_id: &str, approver: &str) -> Result<Schedule> {
        let schedule = self.store.get(schedule_id)?;
        let now = self.clock.now();
        let next_run = if schedule.is_enabled {
            next_due(&schedule.recurrence, now)
        } else {
            None
        };
        if !self
            .store
            .record_approval(schedule_id, approver, now, next_run)?
        {
            return Err(self.wrong_state(
                schedule_id,
                "only pending_approval schedules can be approved",
            ));
        }
        info!(schedule_id = %schedule_id, %approver, "schedule approved");
        Ok(self.store.get(schedule_id)?)
    }

    /// approved → pending_approval. Clears the planned run and cancels any
    /// in-flight execution claimed under the revoked approval.
    pub fn revoke(&self, schedule_id: &str) -> Result<()> {
        if !self.store.revoke_approval(schedule_id)? {
            return Err(self.wrong_state(schedule_id, "only approved schedules can be revoked"));
        }
        self.cancels.cancel(schedule_id);
        info!(schedule_id = %schedule_id, "schedule approval revoked");
        Ok(())
    }

    fn wrong_state(&self, schedule_id: &str, reason: &str) -> SchedulerError {
        SchedulerError::InvalidTransition {
            id: schedule_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rusqlite::Connection;

    use reporthub_core::clock::FixedClock;
    use reporthub_core::external::CapabilityCheck;
    use reporthub_store::types::{EmailSecurityLevel, Frequency, Recurrence, TimeOfDay};
    use reporthub_store::{ApprovalState, NewSchedule};

    struct AllowAll;
    impl CapabilityCheck for AllowAll {
        fn can_schedule_reports(&self, _user_id: &str, _tenant_id: &str) -> bool {
            true
        }
    }

    fn gate() -> (ApprovalGate, Arc<ScheduleStore>, Arc<CancelRegistry>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 6, 10, 7, 0, 0).unwrap(),
        ));
        let conn = Connection::open_in_memory().unwrap();
        reporthub_store::db::init_db(&conn).unwrap();
        let store = Arc::new(ScheduleStore::new(conn, Arc::new(AllowAll), clock.clone()));
        let cancels = Arc::new(CancelRegistry::new());
        let gate = ApprovalGate::new(store.clone(), cancels.clone(), clock);
        (gate, store, cancels)
    }

    fn gated_schedule(store: &ScheduleStore) -> Schedule {
        store
            .create(NewSchedule {
                tenant_id: "acme".into(),
                report_id: "rep-1".into(),
                name: "Audit".into(),
                recurrence: Recurrence {
                    frequency: Frequency::Daily,
                    at: TimeOfDay::new(9, 0),
                    timezone: chrono_tz::UTC,
                    day_of_week: None,
                    day_of_month: None,
                },
                requires_approval: true,
                email_security_level: EmailSecurityLevel::InternalOnly,
                created_by: "u-1".into(),
            })
            .unwrap()
    }

    #[test]
    fn full_lifecycle_draft_pending_approved() {
        let (gate, store, _) = gate();
        let s = gated_schedule(&store);
        assert_eq!(s.approval_state, ApprovalState::Draft);

        gate.submit(&s.id).unwrap();
        let approved = gate.approve(&s.id, "admin").unwrap();
        assert_eq!(approved.approval_state, ApprovalState::Approved);
        assert_eq!(approved.approved_by.as_deref(), Some("admin"));
        // Enabled at approval time: the first run is seeded (09:00 today).
        assert_eq!(
            approved.next_run_at,
            Some(Utc.with_ymd_and_hms(2026, 6, 10, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn approve_from_draft_is_rejected() {
        let (gate, store, _) = gate();
        let s = gated_schedule(&store);
        assert!(matches!(
            gate.approve(&s.id, "admin"),
            Err(SchedulerError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn double_submit_is_rejected() {
        let (gate, store, _) = gate();
        let s = gated_schedule(&store);
        gate.submit(&s.id).unwrap();
        assert!(gate.submit(&s.id).is_err());
    }

    #[test]
    fn revoke_clears_next_run_and_fires_cancellation() {
        let (gate, store, cancels) = gate();
        let s = gated_schedule(&store);
        gate.submit(&s.id).unwrap();
        gate.approve(&s.id, "admin").unwrap();

        // Simulate an in-flight run claimed under the old approval.
        let cancel_rx = cancels.register(&s.id);

        gate.revoke(&s.id).unwrap();
        let after = store.get(&s.id).unwrap();
        assert_eq!(after.approval_state, ApprovalState::PendingApproval);
        assert!(after.next_run_at.is_none());
        assert!(after.approved_by.is_none());
        assert!(*cancel_rx.borrow(), "in-flight run must observe the revocation");
    }

    #[test]
    fn approve_while_disabled_defers_planning() {
        let (gate, store, _) = gate();
        let s = gated_schedule(&store);
        gate.submit(&s.id).unwrap();
        store.set_enabled(&s.id, "u-1", false).unwrap();
        let approved = gate.approve(&s.id, "admin").unwrap();
        assert_eq!(approved.approval_state, ApprovalState::Approved);
        assert!(approved.next_run_at.is_none());
    }
}
