use rusqlite::Connection;

use crate::error::Result;

/// Initialise the schedules subsystem schema in `conn`.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout. The
/// partial index on `next_run_at` keeps the due-scan cheap: only live,
/// enabled rows with a planned run are indexed.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schedules (
            id                   TEXT PRIMARY KEY NOT NULL,
            tenant_id            TEXT NOT NULL,
            report_id            TEXT NOT NULL,
            name                 TEXT NOT NULL,
            recurrence           TEXT NOT NULL,              -- JSON-encoded Recurrence
            next_run_at          TEXT,                       -- RFC3339 UTC or NULL
            is_enabled           INTEGER NOT NULL DEFAULT 1,
            requires_approval    INTEGER NOT NULL DEFAULT 0,
            approval_state       TEXT NOT NULL DEFAULT 'approved',
            approved_by          TEXT,
            approved_at          TEXT,
            email_security_level TEXT NOT NULL DEFAULT 'unrestricted',
            created_by           TEXT NOT NULL,
            updated_by           TEXT NOT NULL,
            created_at           TEXT NOT NULL,
            updated_at           TEXT NOT NULL,
            deleted_at           TEXT                        -- soft-delete marker
        );

        CREATE INDEX IF NOT EXISTS idx_schedules_due
            ON schedules (next_run_at)
            WHERE deleted_at IS NULL AND is_enabled = 1 AND next_run_at IS NOT NULL;

        CREATE INDEX IF NOT EXISTS idx_schedules_tenant
            ON schedules (tenant_id, created_at);

        CREATE TABLE IF NOT EXISTS recipients (
            id          TEXT PRIMARY KEY NOT NULL,
            schedule_id TEXT NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
            email       TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE (schedule_id, email)
        );

        CREATE INDEX IF NOT EXISTS idx_recipients_schedule
            ON recipients (schedule_id);",
    )?;
    Ok(())
}
