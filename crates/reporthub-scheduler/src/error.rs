use thiserror::Error;

/// Errors that can occur within the scheduling subsystem.
///
/// Claim contention is *not* an error — it is the `AlreadyClaimed` outcome
/// of [`crate::claim::ScheduleClaimer::try_claim`]. Execution and delivery
/// failures are recorded on the execution record, never raised here.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Schedule persistence failed.
    #[error(transparent)]
    Store(#[from] reporthub_store::StoreError),

    /// No execution record with the given id exists.
    #[error("execution not found: {id}")]
    ExecutionNotFound { id: String },

    /// An approval operation was attempted from the wrong state.
    #[error("invalid approval transition for schedule {id}: {reason}")]
    InvalidTransition { id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
