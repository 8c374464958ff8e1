//! Collaborator interfaces consumed by the scheduling core.
//!
//! The platform around reporthub (query engine, mail gateway, tenant
//! directory, authorization) is out of scope for this workspace — the
//! core only talks to it through these traits. Reference implementations
//! over HTTP live in the daemon crate; tests use in-memory fakes.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result payload produced by one report execution.
///
/// The content is opaque to the scheduler — it is produced by the query
/// engine and forwarded verbatim to the mail gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportPayload {
    /// The report definition this payload was generated from.
    pub report_id: String,
    /// When the query engine finished producing the payload.
    pub generated_at: DateTime<Utc>,
    /// Rendered report body (JSON, shape owned by the query engine).
    pub content: serde_json::Value,
}

/// Failure modes of the external query engine.
#[derive(Debug, Error)]
pub enum ExecuteError {
    /// The query engine could not be reached.
    #[error("query engine unavailable: {0}")]
    Unavailable(String),

    /// The query engine ran the report and reported a failure.
    #[error("report execution failed: {0}")]
    Failed(String),

    /// The query engine answered with something we could not decode.
    #[error("malformed report payload: {0}")]
    MalformedPayload(String),
}

/// The external query engine that actually produces report data.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run the report identified by `report_id` and return its payload.
    async fn execute(&self, report_id: &str) -> Result<ReportPayload, ExecuteError>;
}

/// Failure modes of the external mail gateway, per recipient.
#[derive(Debug, Error)]
pub enum SendError {
    /// The gateway could not be reached or timed out.
    #[error("mail transport error: {0}")]
    Transport(String),

    /// The gateway rejected this specific address.
    #[error("recipient rejected: {0}")]
    Rejected(String),
}

/// The external mail gateway. Called once per recipient; implementations
/// must be safe to invoke concurrently (`&self`).
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Deliver `payload` to a single address.
    async fn send(&self, to: &str, subject: &str, payload: &ReportPayload)
        -> Result<(), SendError>;
}

/// Tenant directory lookup failures.
#[derive(Debug, Error)]
#[error("tenant directory error: {0}")]
pub struct DirectoryError(pub String);

/// The tenant directory, source of truth for each tenant's allowed email
/// domains. Used to classify recipients as internal or external.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Lowercased domain names considered internal for `tenant_id`.
    async fn allowed_domains(&self, tenant_id: &str) -> Result<HashSet<String>, DirectoryError>;
}

/// External authorization decision, consulted only when schedules are
/// created or modified — never by the scheduling loop itself.
pub trait CapabilityCheck: Send + Sync {
    /// Whether `user_id` may configure report schedules for `tenant_id`.
    fn can_schedule_reports(&self, user_id: &str, tenant_id: &str) -> bool;
}
