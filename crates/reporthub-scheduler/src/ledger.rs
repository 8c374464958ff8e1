//! Append-only record of every execution attempt.
//!
//! Records are inserted `pending` by the claimer, moved to `running` by
//! the runner, and end in exactly one terminal status. Every transition is
//! a conditional UPDATE guarded on the current status, so a record that
//! has reached a terminal state is immutable — the guard simply matches
//! zero rows afterwards.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SchedulerError};

/// Lifecycle state of one execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Claimed, not yet handed to the runner.
    Pending,
    /// The query engine is producing the report.
    Running,
    /// Finished; delivery counts are final (failures there do not make the
    /// execution failed).
    Completed,
    /// Execution fault: engine error, timeout, or stale-claim recovery.
    Failed,
    /// Externally aborted (schedule disabled, deleted, or approval revoked
    /// mid-run). Never used for internal faults.
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExecutionStatus::Pending),
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// One attempted run of a schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// UUID v4 string — primary key.
    pub id: String,
    pub schedule_id: String,
    pub tenant_id: String,
    pub report_id: String,
    /// The due instant this run was claimed for (not when it actually ran).
    pub scheduled_for: DateTime<Utc>,
    /// Claim time; the liveness window is measured from here.
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub emails_sent: u32,
    pub emails_failed: u32,
    pub error_message: Option<String>,
}

const EXECUTION_COLUMNS: &str = "id, schedule_id, tenant_id, report_id, scheduled_for, \
     started_at, completed_at, status, emails_sent, emails_failed, error_message";

/// Error reason recorded when stale recovery reclaims an abandoned run.
pub const STALE_RECOVERY_REASON: &str = "abandoned: no terminal status within liveness window";

/// Append-only execution history with the in-flight lookup the claimer's
/// liveness check relies on.
pub struct ExecutionLedger {
    conn: Arc<Mutex<Connection>>,
}

impl ExecutionLedger {
    /// Wrap an already-open (and `init_db`-initialised) connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// The shared connection — the claimer runs its claim transaction on
    /// the same handle so the insert and the schedule update are one unit.
    pub(crate) fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Fetch one record by id.
    pub fn get(&self, id: &str) -> Result<ExecutionRecord> {
        let conn = self.conn.lock().unwrap();
        let sql = format!("SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?1");
        match conn.query_row(&sql, [id], row_to_execution) {
            Ok(r) => Ok(r),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(SchedulerError::ExecutionNotFound {
                id: id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// History for one schedule, newest first.
    pub fn for_schedule(&self, schedule_id: &str, limit: u32) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions
             WHERE schedule_id = ?1 ORDER BY started_at DESC LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params![schedule_id, limit], row_to_execution)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// All records started within `[from, to)`, oldest first.
    pub fn in_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions
             WHERE started_at >= ?1 AND started_at < ?2 ORDER BY started_at"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params![from.to_rfc3339(), to.to_rfc3339()],
                row_to_execution,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// The schedule's non-terminal record, if any. At most one exists by
    /// construction (partial unique index).
    pub fn in_flight(&self, schedule_id: &str) -> Result<Option<ExecutionRecord>> {
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions
             WHERE schedule_id = ?1 AND status IN ('pending', 'running')"
        );
        match conn.query_row(&sql, [schedule_id], row_to_execution) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// pending → running. Returns `false` when the record is no longer
    /// pending (e.g. already reclaimed as stale).
    pub fn mark_running(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE executions SET status = 'running' WHERE id = ?1 AND status = 'pending'",
            [id],
        )?;
        Ok(n > 0)
    }

    /// Move an in-flight record to a terminal status, writing the delivery
    /// counts atomically with the transition. Returns `false` when the
    /// record was already terminal (the write is discarded — terminal
    /// records are immutable).
    pub fn finish(
        &self,
        id: &str,
        status: ExecutionStatus,
        completed_at: DateTime<Utc>,
        emails_sent: u32,
        emails_failed: u32,
        error_message: Option<&str>,
    ) -> Result<bool> {
        debug_assert!(status.is_terminal());
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE executions
             SET status = ?1, completed_at = ?2, emails_sent = ?3, emails_failed = ?4,
                 error_message = ?5
             WHERE id = ?6 AND status IN ('pending', 'running')",
            rusqlite::params![
                status.to_string(),
                completed_at.to_rfc3339(),
                emails_sent,
                emails_failed,
                error_message,
                id
            ],
        )?;
        if n == 0 {
            warn!(execution_id = %id, status = %status, "terminal write ignored: record already terminal");
        }
        Ok(n > 0)
    }

    /// Mark every in-flight record started before `cutoff` as failed with
    /// the stale-recovery reason. One atomic UPDATE: under concurrent
    /// recoverers each record is reclaimed exactly once, because the losing
    /// UPDATE no longer matches the status predicate.
    pub fn recover_stale(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE executions
             SET status = 'failed', completed_at = ?1, error_message = ?2
             WHERE status IN ('pending', 'running') AND started_at < ?3",
            rusqlite::params![now.to_rfc3339(), STALE_RECOVERY_REASON, cutoff.to_rfc3339()],
        )?;
        Ok(n)
    }
}

pub(crate) fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    use std::str::FromStr;
    let status_str: String = row.get(7)?;
    let status = ExecutionStatus::from_str(&status_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            7,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
        )
    })?;
    Ok(ExecutionRecord {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        tenant_id: row.get(2)?,
        report_id: row.get(3)?,
        scheduled_for: ts(row, 4)?,
        started_at: ts(row, 5)?,
        completed_at: opt_ts(row, 6)?,
        status,
        emails_sent: row.get(8)?,
        emails_failed: row.get(9)?,
        error_message: row.get(10)?,
    })
}

fn ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    parse_ts(&s, idx)
}

fn opt_ts(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| parse_ts(&s, idx)).transpose()
}

fn parse_ts(s: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}
