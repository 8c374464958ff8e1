//! `reporthub-store` — SQLite persistence for schedules and recipients.
//!
//! # Overview
//!
//! Schedules are persisted to a SQLite `schedules` table, recipients to a
//! `recipients` table with a `(schedule_id, email)` uniqueness constraint.
//! The [`schedules::ScheduleStore`] wraps one connection behind a `Mutex`
//! (same single-node discipline as the rest of the workspace) and enforces
//! two things at the boundary:
//!
//! - **Validation**: a recurrence spec that cannot produce well-defined
//!   occurrences (bad day-of-month, unknown timezone, missing weekday for
//!   a weekly schedule) is rejected at create/update time and never reaches
//!   the scheduling loop.
//! - **Authorization**: every mutating call consults the external
//!   [`CapabilityCheck`](reporthub_core::external::CapabilityCheck) for the
//!   acting user and owning tenant.
//!
//! The [`recurrence`] module is the pure next-occurrence calculator shared
//! by the store (seeding `next_run_at` on create/enable) and the scheduler
//! engine (re-anchoring after each completed run).

pub mod db;
pub mod error;
pub mod recurrence;
pub mod schedules;
pub mod types;

mod recipients;

pub use error::{Result, StoreError};
pub use schedules::ScheduleStore;
pub use types::{
    ApprovalState, EmailSecurityLevel, Frequency, NewSchedule, Recipient, Recurrence, Schedule,
    TimeOfDay, UpdateSchedule,
};
