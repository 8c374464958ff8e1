//! Atomic per-due-instant claim arbitration.
//!
//! The claim is one SQLite transaction: a conditional UPDATE that nulls
//! `next_run_at` only if it still equals the due instant the caller saw,
//! plus the insert of the `pending` execution record. Concurrent claimers
//! (other poll cycles, other scheduler instances on the same file) lose
//! either on the UPDATE predicate or on the in-flight unique index — both
//! surface as `AlreadyClaimed`, which is an expected outcome, not an error.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use reporthub_store::Schedule;

use crate::error::Result;
use crate::ledger::{ExecutionLedger, ExecutionRecord, ExecutionStatus};

/// Outcome of one claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// This caller owns the run; the `pending` record is already persisted.
    Claimed(ExecutionRecord),
    /// Another caller owns this due instant (or a run is still in flight).
    AlreadyClaimed,
    /// The schedule is not due, or no longer eligible.
    NotDue,
}

/// Claims execution slots. Cheap to clone; clones share the connection.
#[derive(Clone)]
pub struct ScheduleClaimer {
    conn: Arc<Mutex<Connection>>,
}

impl ScheduleClaimer {
    /// Build a claimer sharing the ledger's connection, so the schedule
    /// update and the record insert commit (or roll back) together.
    pub fn new(ledger: &ExecutionLedger) -> Self {
        Self {
            conn: ledger.connection(),
        }
    }

    /// Attempt to claim `schedule` for its current due instant.
    pub fn try_claim(&self, schedule: &Schedule, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let due = match schedule.next_run_at {
            Some(due) if due <= now => due,
            _ => return Ok(ClaimOutcome::NotDue),
        };

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let won = tx.execute(
            "UPDATE schedules SET next_run_at = NULL, updated_at = ?1
             WHERE id = ?2 AND next_run_at = ?3
               AND deleted_at IS NULL AND is_enabled = 1 AND approval_state = 'approved'",
            rusqlite::params![now.to_rfc3339(), schedule.id, due.to_rfc3339()],
        )?;

        if won == 0 {
            // Either the schedule became ineligible, or another claimer got
            // here first (next_run_at is NULL or already recomputed).
            let still_eligible: Option<Option<String>> = tx
                .query_row(
                    "SELECT next_run_at FROM schedules
                     WHERE id = ?1 AND deleted_at IS NULL AND is_enabled = 1
                       AND approval_state = 'approved'",
                    [&schedule.id],
                    |row| row.get(0),
                )
                .optional()?;
            return Ok(match still_eligible {
                None => ClaimOutcome::NotDue,
                Some(_) => ClaimOutcome::AlreadyClaimed,
            });
        }

        let record = ExecutionRecord {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule.id.clone(),
            tenant_id: schedule.tenant_id.clone(),
            report_id: schedule.report_id.clone(),
            scheduled_for: due,
            started_at: now,
            completed_at: None,
            status: ExecutionStatus::Pending,
            emails_sent: 0,
            emails_failed: 0,
            error_message: None,
        };
        let inserted = tx.execute(
            "INSERT INTO executions
             (id, schedule_id, tenant_id, report_id, scheduled_for, started_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
            rusqlite::params![
                record.id,
                record.schedule_id,
                record.tenant_id,
                record.report_id,
                record.scheduled_for.to_rfc3339(),
                record.started_at.to_rfc3339(),
            ],
        );
        match inserted {
            Ok(_) => {
                tx.commit()?;
                debug!(schedule_id = %schedule.id, execution_id = %record.id, due = %due, "claim won");
                Ok(ClaimOutcome::Claimed(record))
            }
            // In-flight unique index: a run for this schedule is still
            // pending/running (e.g. a slow run from the previous instant).
            // Dropping the transaction rolls the UPDATE back, so the due
            // instant stays claimable once the in-flight run resolves.
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                drop(tx);
                debug!(schedule_id = %schedule.id, "claim lost: execution already in flight");
                Ok(ClaimOutcome::AlreadyClaimed)
            }
            Err(e) => Err(e.into()),
        }
    }
}
