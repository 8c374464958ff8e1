use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::info;
use uuid::Uuid;

use reporthub_core::clock::Clock;
use reporthub_core::external::CapabilityCheck;

use crate::error::{Result, StoreError};
use crate::recurrence::next_due;
use crate::types::{ApprovalState, NewSchedule, Schedule, UpdateSchedule};

/// Column order shared by every SELECT in this crate; keep in sync with
/// [`row_to_schedule`].
pub(crate) const SCHEDULE_COLUMNS: &str = "id, tenant_id, report_id, name, recurrence, \
     next_run_at, is_enabled, requires_approval, approval_state, approved_by, approved_at, \
     email_security_level, created_by, updated_by, created_at, updated_at, deleted_at";

/// Thread-safe manager for persisted schedules and their recipients.
///
/// Wraps a single SQLite connection in a `Mutex` — sufficient for the
/// single-node target; the scheduler's claimer opens its own connection
/// against the same file.
pub struct ScheduleStore {
    pub(crate) db: Mutex<Connection>,
    caps: Arc<dyn CapabilityCheck>,
    clock: Arc<dyn Clock>,
}

impl ScheduleStore {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection, caps: Arc<dyn CapabilityCheck>, clock: Arc<dyn Clock>) -> Self {
        Self {
            db: Mutex::new(conn),
            caps,
            clock,
        }
    }

    /// Create a schedule. The recurrence is validated here so the scheduling
    /// loop only ever sees specs that produce well-defined occurrences.
    ///
    /// Schedules that do not require approval are born `approved` with
    /// `next_run_at` already seeded; approval-gated ones are born `draft`
    /// with no planned run.
    pub fn create(&self, new: NewSchedule) -> Result<Schedule> {
        self.authorize(&new.created_by, &new.tenant_id)?;
        new.recurrence.validate()?;

        let now = self.clock.now();
        let approval_state = if new.requires_approval {
            ApprovalState::Draft
        } else {
            ApprovalState::Approved
        };
        let next_run = match approval_state {
            ApprovalState::Approved => Some(first_run(&new, now)?),
            _ => None,
        };

        let id = Uuid::new_v4().to_string();
        let recurrence_json = serde_json::to_string(&new.recurrence)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO schedules
             (id, tenant_id, report_id, name, recurrence, next_run_at, is_enabled,
              requires_approval, approval_state, approved_by, approved_at,
              email_security_level, created_by, updated_by, created_at, updated_at, deleted_at)
             VALUES (?1,?2,?3,?4,?5,?6,1,?7,?8,NULL,NULL,?9,?10,?10,?11,?11,NULL)",
            rusqlite::params![
                id,
                new.tenant_id,
                new.report_id,
                new.name,
                recurrence_json,
                next_run.map(|dt| dt.to_rfc3339()),
                new.requires_approval as i32,
                approval_state.to_string(),
                new.email_security_level.to_string(),
                new.created_by,
                now.to_rfc3339(),
            ],
        )?;
        info!(schedule_id = %id, tenant = %new.tenant_id, name = %new.name, "schedule created");
        drop(db);
        self.get(&id)
    }

    /// Fetch a schedule by id. Soft-deleted rows are treated as absent.
    pub fn get(&self, id: &str) -> Result<Schedule> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1 AND deleted_at IS NULL"
        );
        match db.query_row(&sql, [id], row_to_schedule) {
            Ok(s) => Ok(s),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::ScheduleNotFound {
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// All live schedules for a tenant, oldest first.
    pub fn list_for_tenant(&self, tenant_id: &str) -> Result<Vec<Schedule>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE tenant_id = ?1 AND deleted_at IS NULL ORDER BY created_at"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map([tenant_id], row_to_schedule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Apply a partial update. A changed recurrence is re-validated and, if
    /// the schedule is currently runnable, `next_run_at` is recomputed from
    /// the present so the new spec takes effect immediately.
    pub fn update(&self, id: &str, actor: &str, changes: UpdateSchedule) -> Result<Schedule> {
        let mut schedule = self.get(id)?;
        self.authorize(actor, &schedule.tenant_id)?;

        if let Some(name) = changes.name {
            schedule.name = name;
        }
        if let Some(level) = changes.email_security_level {
            schedule.email_security_level = level;
        }
        let mut next_run = schedule.next_run_at;
        if let Some(recurrence) = changes.recurrence {
            recurrence.validate()?;
            if schedule.is_enabled && schedule.approval_state == ApprovalState::Approved {
                next_run = next_due(&recurrence, self.clock.now());
            }
            schedule.recurrence = recurrence;
        }

        let now = self.clock.now();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE schedules
             SET name = ?1, recurrence = ?2, email_security_level = ?3,
                 next_run_at = ?4, updated_by = ?5, updated_at = ?6
             WHERE id = ?7 AND deleted_at IS NULL",
            rusqlite::params![
                schedule.name,
                serde_json::to_string(&schedule.recurrence)?,
                schedule.email_security_level.to_string(),
                next_run.map(|dt| dt.to_rfc3339()),
                actor,
                now.to_rfc3339(),
                id,
            ],
        )?;
        drop(db);
        self.get(id)
    }

    /// Enable or disable a schedule. Disabling clears the planned run;
    /// enabling an approved schedule seeds it again from the present.
    pub fn set_enabled(&self, id: &str, actor: &str, enabled: bool) -> Result<Schedule> {
        let schedule = self.get(id)?;
        self.authorize(actor, &schedule.tenant_id)?;

        let next_run = if enabled && schedule.approval_state == ApprovalState::Approved {
            next_due(&schedule.recurrence, self.clock.now())
        } else {
            None
        };

        let now = self.clock.now();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE schedules
             SET is_enabled = ?1, next_run_at = ?2, updated_by = ?3, updated_at = ?4
             WHERE id = ?5 AND deleted_at IS NULL",
            rusqlite::params![
                enabled as i32,
                next_run.map(|dt| dt.to_rfc3339()),
                actor,
                now.to_rfc3339(),
                id
            ],
        )?;
        info!(schedule_id = %id, enabled, "schedule toggled");
        drop(db);
        self.get(id)
    }

    /// Soft-delete a schedule and clear its planned run. The row (and its
    /// execution history) remains for auditing; recipients cascade only on
    /// a hard delete.
    pub fn remove(&self, id: &str, actor: &str) -> Result<()> {
        let schedule = self.get(id)?;
        self.authorize(actor, &schedule.tenant_id)?;

        let now = self.clock.now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE schedules
             SET deleted_at = ?1, next_run_at = NULL, updated_by = ?2, updated_at = ?1
             WHERE id = ?3 AND deleted_at IS NULL",
            rusqlite::params![now, actor, id],
        )?;
        info!(schedule_id = %id, "schedule removed");
        Ok(())
    }

    /// Schedules ready to run: approved, enabled, live, with a due
    /// `next_run_at`. Oldest-due first so a backlog cannot starve any
    /// single schedule.
    pub fn due_schedules(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Schedule>> {
        let db = self.db.lock().unwrap();
        let sql = format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules
             WHERE deleted_at IS NULL AND is_enabled = 1
               AND approval_state = 'approved'
               AND next_run_at IS NOT NULL AND next_run_at <= ?1
             ORDER BY next_run_at ASC
             LIMIT ?2"
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params![now.to_rfc3339(), limit], row_to_schedule)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Persist a recomputed `next_run_at` unconditionally (administrative
    /// repair, tests). Deliberately not capability-checked — it is not a
    /// user-facing mutation. The engine plans through [`Self::plan_next_run`].
    pub fn set_next_run(&self, id: &str, next: Option<DateTime<Utc>>) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE schedules SET next_run_at = ?1, updated_at = ?2
             WHERE id = ?3 AND deleted_at IS NULL",
            rusqlite::params![
                next.map(|dt| dt.to_rfc3339()),
                self.clock.now().to_rfc3339(),
                id
            ],
        )?;
        if n == 0 {
            return Err(StoreError::ScheduleNotFound { id: id.to_string() });
        }
        Ok(())
    }

    /// Persist a recomputed `next_run_at` only while the schedule is still
    /// runnable. The eligibility predicate lives in the UPDATE itself, so a
    /// disable, delete, or revocation racing this call can never leave a
    /// planned run on an ineligible schedule. Returns `false` when the
    /// schedule was no longer runnable.
    pub fn plan_next_run(&self, id: &str, next: Option<DateTime<Utc>>) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE schedules SET next_run_at = ?1, updated_at = ?2
             WHERE id = ?3 AND deleted_at IS NULL AND is_enabled = 1
               AND approval_state = 'approved'",
            rusqlite::params![
                next.map(|dt| dt.to_rfc3339()),
                self.clock.now().to_rfc3339(),
                id
            ],
        )?;
        Ok(n > 0)
    }

    // --- approval primitives (driven by the scheduler's ApprovalGate) ------

    /// draft → pending_approval. Returns `false` when the schedule was not
    /// in `draft` (the transition is one-way and idempotence is the
    /// caller's concern).
    pub fn submit_for_approval(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE schedules SET approval_state = 'pending_approval', updated_at = ?1
             WHERE id = ?2 AND approval_state = 'draft' AND deleted_at IS NULL",
            rusqlite::params![self.clock.now().to_rfc3339(), id],
        )?;
        Ok(n > 0)
    }

    /// pending_approval → approved, recording approver identity and seeding
    /// the first planned run. Conditional on the current state so two
    /// concurrent approvers cannot both win.
    pub fn record_approval(
        &self,
        id: &str,
        approver: &str,
        approved_at: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE schedules
             SET approval_state = 'approved', approved_by = ?1, approved_at = ?2,
                 next_run_at = ?3, updated_at = ?2
             WHERE id = ?4 AND approval_state = 'pending_approval' AND deleted_at IS NULL",
            rusqlite::params![
                approver,
                approved_at.to_rfc3339(),
                next_run.map(|dt| dt.to_rfc3339()),
                id
            ],
        )?;
        Ok(n > 0)
    }

    /// approved → pending_approval. Clears approver fields *and* the
    /// planned run, so a claim computed under the old approval cannot
    /// silently proceed.
    pub fn revoke_approval(&self, id: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE schedules
             SET approval_state = 'pending_approval', approved_by = NULL,
                 approved_at = NULL, next_run_at = NULL, updated_at = ?1
             WHERE id = ?2 AND approval_state = 'approved' AND deleted_at IS NULL",
            rusqlite::params![self.clock.now().to_rfc3339(), id],
        )?;
        Ok(n > 0)
    }

    // --- internal helpers --------------------------------------------------

    pub(crate) fn authorize(&self, user_id: &str, tenant_id: &str) -> Result<()> {
        if self.caps.can_schedule_reports(user_id, tenant_id) {
            Ok(())
        } else {
            Err(StoreError::PermissionDenied {
                user_id: user_id.to_string(),
                tenant_id: tenant_id.to_string(),
            })
        }
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn first_run(new: &NewSchedule, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    next_due(&new.recurrence, now).ok_or_else(|| {
        StoreError::InvalidRecurrence("recurrence produces no next occurrence".into())
    })
}

/// Map a SELECT row (column order from [`SCHEDULE_COLUMNS`]) to a Schedule.
/// Centralised here so every query in this crate stays consistent.
pub(crate) fn row_to_schedule(row: &rusqlite::Row<'_>) -> rusqlite::Result<Schedule> {
    use std::str::FromStr;
    let recurrence = serde_json::from_str(&row.get::<_, String>(4)?)
        .map_err(|e| conversion_err(4, e))?;
    // Unknown enum values in old rows degrade to the most restrictive state.
    let approval_state = ApprovalState::from_str(&row.get::<_, String>(8)?)
        .unwrap_or(ApprovalState::PendingApproval);
    let email_security_level =
        crate::types::EmailSecurityLevel::from_str(&row.get::<_, String>(11)?)
            .unwrap_or(crate::types::EmailSecurityLevel::InternalOnly);
    Ok(Schedule {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        report_id: row.get(2)?,
        name: row.get(3)?,
        recurrence,
        next_run_at: opt_ts(row, 5)?,
        is_enabled: row.get::<_, i32>(6)? != 0,
        requires_approval: row.get::<_, i32>(7)? != 0,
        approval_state,
        approved_by: row.get(9)?,
        approved_at: opt_ts(row, 10)?,
        email_security_level,
        created_by: row.get(12)?,
        updated_by: row.get(13)?,
        created_at: ts(row, 14)?,
        updated_at: ts(row, 15)?,
        deleted_at: opt_ts(row, 16)?,
    })
}

pub(crate) fn ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_ts(&s).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn opt_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_ts(&s).map_err(|e| conversion_err(idx, e)))
        .transpose()
}

fn parse_ts(s: &str) -> chrono::ParseResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}

fn conversion_err<E: std::error::Error + Send + Sync + 'static>(
    idx: usize,
    e: E,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use reporthub_core::clock::FixedClock;

    use crate::db::init_db;
    use crate::types::{EmailSecurityLevel, Frequency, Recurrence, TimeOfDay};

    pub(crate) struct AllowAll;
    impl CapabilityCheck for AllowAll {
        fn can_schedule_reports(&self, _user_id: &str, _tenant_id: &str) -> bool {
            true
        }
    }

    struct DenyAll;
    impl CapabilityCheck for DenyAll {
        fn can_schedule_reports(&self, _user_id: &str, _tenant_id: &str) -> bool {
            false
        }
    }

    pub(crate) fn test_clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 6, 10, 7, 0, 0).unwrap(),
        ))
    }

    pub(crate) fn test_store(clock: Arc<FixedClock>) -> ScheduleStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        ScheduleStore::new(conn, Arc::new(AllowAll), clock)
    }

    pub(crate) fn daily_9am_utc() -> Recurrence {
        Recurrence {
            frequency: Frequency::Daily,
            at: TimeOfDay::new(9, 0),
            timezone: chrono_tz::UTC,
            day_of_week: None,
            day_of_month: None,
        }
    }

    pub(crate) fn new_schedule(tenant: &str) -> NewSchedule {
        NewSchedule {
            tenant_id: tenant.to_string(),
            report_id: "rep-1".to_string(),
            name: "Weekly revenue".to_string(),
            recurrence: daily_9am_utc(),
            requires_approval: false,
            email_security_level: EmailSecurityLevel::Unrestricted,
            created_by: "u-1".to_string(),
        }
    }

    #[test]
    fn create_seeds_next_run_when_no_approval_needed() {
        let clock = test_clock();
        let store = test_store(clock.clone());
        let s = store.create(new_schedule("acme")).unwrap();
        assert_eq!(s.approval_state, ApprovalState::Approved);
        assert_eq!(
            s.next_run_at,
            Some(Utc.with_ymd_and_hms(2026, 6, 10, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn create_with_approval_starts_draft_without_next_run() {
        let store = test_store(test_clock());
        let mut new = new_schedule("acme");
        new.requires_approval = true;
        let s = store.create(new).unwrap();
        assert_eq!(s.approval_state, ApprovalState::Draft);
        assert!(s.next_run_at.is_none());
    }

    #[test]
    fn create_rejects_invalid_recurrence() {
        let store = test_store(test_clock());
        let mut new = new_schedule("acme");
        new.recurrence.frequency = Frequency::Weekly; // day_of_week missing
        assert!(matches!(
            store.create(new),
            Err(StoreError::InvalidRecurrence(_))
        ));
    }

    #[test]
    fn create_denied_without_capability() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let store = ScheduleStore::new(conn, Arc::new(DenyAll), test_clock());
        assert!(matches!(
            store.create(new_schedule("acme")),
            Err(StoreError::PermissionDenied { .. })
        ));
    }

    #[test]
    fn due_schedules_ordered_oldest_first_and_filtered() {
        let clock = test_clock();
        let store = test_store(clock.clone());
        let a = store.create(new_schedule("acme")).unwrap();
        let b = store.create(new_schedule("acme")).unwrap();
        let c = store.create(new_schedule("acme")).unwrap();

        // Stagger due instants; disable one entirely.
        store
            .set_next_run(&a.id, Some(Utc.with_ymd_and_hms(2026, 6, 10, 6, 0, 0).unwrap()))
            .unwrap();
        store
            .set_next_run(&b.id, Some(Utc.with_ymd_and_hms(2026, 6, 10, 5, 0, 0).unwrap()))
            .unwrap();
        store.set_enabled(&c.id, "u-1", false).unwrap();

        let due = store.due_schedules(clock.now(), 10).unwrap();
        let ids: Vec<_> = due.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str()]);
    }

    #[test]
    fn disable_clears_and_enable_reseeds_next_run() {
        let clock = test_clock();
        let store = test_store(clock.clone());
        let s = store.create(new_schedule("acme")).unwrap();

        let s = store.set_enabled(&s.id, "u-1", false).unwrap();
        assert!(s.next_run_at.is_none());

        let s = store.set_enabled(&s.id, "u-1", true).unwrap();
        assert_eq!(
            s.next_run_at,
            Some(Utc.with_ymd_and_hms(2026, 6, 10, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn plan_next_run_skips_schedules_no_longer_runnable() {
        let clock = test_clock();
        let store = test_store(clock.clone());
        let s = store.create(new_schedule("acme")).unwrap();
        let next = Utc.with_ymd_and_hms(2026, 6, 11, 9, 0, 0).unwrap();

        store.set_enabled(&s.id, "u-1", false).unwrap();
        assert!(!store.plan_next_run(&s.id, Some(next)).unwrap());
        assert!(store.get(&s.id).unwrap().next_run_at.is_none());

        store.set_enabled(&s.id, "u-1", true).unwrap();
        assert!(store.plan_next_run(&s.id, Some(next)).unwrap());
        assert_eq!(store.get(&s.id).unwrap().next_run_at, Some(next));

        store.remove(&s.id, "u-1").unwrap();
        assert!(!store.plan_next_run(&s.id, Some(next)).unwrap());
    }

    #[test]
    fn removed_schedule_is_invisible() {
        let store = test_store(test_clock());
        let s = store.create(new_schedule("acme")).unwrap();
        store.remove(&s.id, "u-1").unwrap();
        assert!(matches!(
            store.get(&s.id),
            Err(StoreError::ScheduleNotFound { .. })
        ));
        assert!(store.due_schedules(store.now(), 10).unwrap().is_empty());
    }

    #[test]
    fn update_recurrence_revalidates_and_recomputes() {
        let clock = test_clock();
        let store = test_store(clock.clone());
        let s = store.create(new_schedule("acme")).unwrap();

        let mut recurrence = daily_9am_utc();
        recurrence.at = TimeOfDay::new(6, 30);
        let updated = store
            .update(
                &s.id,
                "u-2",
                UpdateSchedule {
                    recurrence: Some(recurrence),
                    ..Default::default()
                },
            )
            .unwrap();
        // 06:30 already passed at the pinned 07:00 — next run is tomorrow.
        assert_eq!(
            updated.next_run_at,
            Some(Utc.with_ymd_and_hms(2026, 6, 11, 6, 30, 0).unwrap())
        );
        assert_eq!(updated.updated_by, "u-2");
    }

    #[test]
    fn approval_transitions_are_conditional() {
        let clock = test_clock();
        let store = test_store(clock.clone());
        let mut new = new_schedule("acme");
        new.requires_approval = true;
        let s = store.create(new).unwrap();

        // approve before submit: no-op
        assert!(!store.record_approval(&s.id, "admin", clock.now(), None).unwrap());

        assert!(store.submit_for_approval(&s.id).unwrap());
        assert!(!store.submit_for_approval(&s.id).unwrap()); // already pending

        let next = Utc.with_ymd_and_hms(2026, 6, 10, 9, 0, 0).unwrap();
        assert!(store
            .record_approval(&s.id, "admin", clock.now(), Some(next))
            .unwrap());
        let s2 = store.get(&s.id).unwrap();
        assert_eq!(s2.approval_state, ApprovalState::Approved);
        assert_eq!(s2.approved_by.as_deref(), Some("admin"));
        assert_eq!(s2.next_run_at, Some(next));

        assert!(store.revoke_approval(&s.id).unwrap());
        assert!(!store.revoke_approval(&s.id).unwrap()); // second revoke is a no-op
        let s3 = store.get(&s.id).unwrap();
        assert_eq!(s3.approval_state, ApprovalState::PendingApproval);
        assert!(s3.next_run_at.is_none());
        assert!(s3.approved_by.is_none());
    }
}
