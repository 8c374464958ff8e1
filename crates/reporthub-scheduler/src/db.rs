use rusqlite::Connection;

use crate::error::Result;

/// Initialise the execution-ledger schema in `conn`.
///
/// The partial unique index is the heart of the mutual-exclusion
/// invariant: at most one execution per schedule may sit in a non-terminal
/// status, enforced by SQLite itself no matter how many scheduler
/// instances share the file.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS executions (
            id            TEXT PRIMARY KEY NOT NULL,
            schedule_id   TEXT NOT NULL,
            tenant_id     TEXT NOT NULL,
            report_id     TEXT NOT NULL,
            scheduled_for TEXT NOT NULL,   -- the due instant this run was claimed for
            started_at    TEXT NOT NULL,   -- claim time
            completed_at  TEXT,            -- NULL while pending/running
            status        TEXT NOT NULL DEFAULT 'pending',
            emails_sent   INTEGER NOT NULL DEFAULT 0,
            emails_failed INTEGER NOT NULL DEFAULT 0,
            error_message TEXT
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_in_flight
            ON executions (schedule_id)
            WHERE status IN ('pending', 'running');

        CREATE INDEX IF NOT EXISTS idx_executions_schedule
            ON executions (schedule_id, started_at DESC);

        CREATE INDEX IF NOT EXISTS idx_executions_window
            ON executions (started_at);",
    )?;
    Ok(())
}
