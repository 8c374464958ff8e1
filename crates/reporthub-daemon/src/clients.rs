//! HTTP implementations of the platform collaborator traits.
//!
//! The query engine and the mail gateway are separate services; these
//! clients are the daemon's only outbound edges. Both are configured in
//! `reporthub.toml` and degrade to explicit "not configured" errors so a
//! half-configured daemon fails loudly per run instead of at startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use reporthub_core::config::{DeliveryConfig, ExecutorConfig};
use reporthub_core::external::{
    EmailTransport, ExecuteError, QueryExecutor, ReportPayload, SendError,
};

/// Client for the report query engine.
pub struct HttpQueryExecutor {
    client: reqwest::Client,
    base_url: Option<String>,
    api_token: Option<String>,
}

impl HttpQueryExecutor {
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            api_token: config.api_token.clone(),
        }
    }
}

/// Response body of `POST /reports/{id}/execute`.
#[derive(Deserialize)]
struct ExecuteResponse {
    /// Engine-side completion time; absent on older engine versions.
    generated_at: Option<DateTime<Utc>>,
    content: serde_json::Value,
}

#[async_trait]
impl QueryExecutor for HttpQueryExecutor {
    async fn execute(&self, report_id: &str) -> Result<ReportPayload, ExecuteError> {
        let base = self.base_url.as_deref().ok_or_else(|| {
            ExecuteError::Unavailable("executor.base_url not configured".to_string())
        })?;
        let url = format!("{base}/reports/{report_id}/execute");
        debug!(%report_id, "requesting report execution");

        let mut builder = self.client.post(&url);
        if let Some(ref token) = self.api_token {
            builder = builder.bearer_auth(token);
        }
        let resp = builder
            .send()
            .await
            .map_err(|e| ExecuteError::Unavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ExecuteError::Failed(format!("{status}: {text}")));
        }

        let body: ExecuteResponse = resp
            .json()
            .await
            .map_err(|e| ExecuteError::MalformedPayload(e.to_string()))?;
        Ok(ReportPayload {
            report_id: report_id.to_string(),
            generated_at: body.generated_at.unwrap_or_else(Utc::now),
            content: body.content,
        })
    }
}

/// Client for the outbound mail gateway. One POST per recipient.
pub struct HttpEmailTransport {
    client: reqwest::Client,
    endpoint: Option<String>,
    from_address: Option<String>,
}

impl HttpEmailTransport {
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            from_address: config.from_address.clone(),
        }
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        payload: &ReportPayload,
    ) -> Result<(), SendError> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            SendError::Transport("delivery.endpoint not configured".to_string())
        })?;

        let body = serde_json::json!({
            "from": self.from_address,
            "to": to,
            "subject": subject,
            "report_id": payload.report_id,
            "generated_at": payload.generated_at,
            "content": payload.content,
        });
        let resp = self
            .client
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_client_error() {
            // 4xx means the gateway looked at this address and said no.
            let text = resp.text().await.unwrap_or_default();
            return Err(SendError::Rejected(format!("{status}: {text}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SendError::Transport(format!("{status}: {text}")));
        }
        debug!(%to, "report delivered");
        Ok(())
    }
}
