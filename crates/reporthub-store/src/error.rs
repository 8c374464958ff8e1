use thiserror::Error;

/// Errors that can occur during schedule and recipient operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No schedule with the given id exists (or it is soft-deleted).
    #[error("schedule not found: {id}")]
    ScheduleNotFound { id: String },

    /// The recurrence spec cannot produce well-defined occurrences.
    ///
    /// Raised at create/update time only — an invalid spec never reaches
    /// the scheduling loop.
    #[error("invalid recurrence: {0}")]
    InvalidRecurrence(String),

    /// The address is already configured on this schedule.
    #[error("recipient {email} already exists on schedule {schedule_id}")]
    DuplicateRecipient { schedule_id: String, email: String },

    /// No recipient with the given id exists on this schedule.
    #[error("recipient not found: {id}")]
    RecipientNotFound { id: String },

    /// The address is not a plausible email (missing local part or domain).
    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    /// The external capability check denied the acting user.
    #[error("user {user_id} may not configure schedules for tenant {tenant_id}")]
    PermissionDenied { user_id: String, tenant_id: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
