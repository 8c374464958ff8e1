//! `reporthub-scheduler` — Tokio-based execution engine for recurring
//! report schedules, with SQLite persistence.
//!
//! # Overview
//!
//! The [`engine::SchedulerEngine`] polls the database every few seconds
//! and, for every approved, enabled schedule whose `next_run_at` has
//! arrived, claims an execution slot, runs the report through the external
//! query engine, and fans the result out to the schedule's recipients.
//! Every attempt — successful or not — leaves an immutable row in the
//! `executions` ledger.
//!
//! # Pipeline per due schedule
//!
//! | Stage                       | Module      | Guarantee                                   |
//! |-----------------------------|-------------|---------------------------------------------|
//! | Claim the due instant       | [`claim`]   | exactly one winner per instant              |
//! | Run the report query        | [`runner`]  | hard timeout, cancellation at await points  |
//! | Deliver to recipients       | [`notifier`]| per-recipient isolation, domain policy      |
//! | Record the outcome          | [`ledger`]  | terminal rows are immutable                 |
//! | Plan the next occurrence    | [`engine`]  | re-anchored on the run's own instant        |
//!
//! Crash safety comes from the ledger, not from task state: a process
//! that dies mid-run leaves a `pending`/`running` row behind, and
//! [`ledger::ExecutionLedger::recover_stale`] settles it as `failed` on a
//! later cycle, unblocking the schedule.

pub mod approval;
pub mod cancel;
pub mod claim;
pub mod control;
pub mod db;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod notifier;
pub mod runner;

pub use approval::ApprovalGate;
pub use cancel::CancelRegistry;
pub use claim::{ClaimOutcome, ScheduleClaimer};
pub use control::ScheduleControl;
pub use engine::SchedulerEngine;
pub use error::{Result, SchedulerError};
pub use ledger::{ExecutionLedger, ExecutionRecord, ExecutionStatus};
pub use notifier::{DeliveryStats, DispatchOutcome, Notifier};
pub use runner::ExecutionRunner;
