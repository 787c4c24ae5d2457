//! External collaborators: PDF artifact generation and notification dispatch.
//!
//! Both are consumed as opaque services behind traits. Calls happen strictly
//! after the governing state transition is committed and are idempotent at
//! the caller (NULL-guarded artifact column, batch-recipient row state), so
//! a duplicate invocation after a crash is safe.

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct UpstreamError(pub String);

/// Flattens a fully signed session into a durable artifact and returns its
/// URL.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(
        &self,
        session_id: &str,
        signed_fields: &Value,
    ) -> Result<String, UpstreamError>;
}

/// Delivers an email/notification. Success or failure is per call.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, to: &str, subject: &str, template_data: &Value)
        -> Result<(), UpstreamError>;
}

/// PDF service over HTTP: POST the signed payload, receive `{ "url": ... }`.
pub struct HttpArtifactGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpArtifactGenerator {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl ArtifactGenerator for HttpArtifactGenerator {
    async fn generate(
        &self,
        session_id: &str,
        signed_fields: &Value,
    ) -> Result<String, UpstreamError> {
        let body = json!({
            "sessionId": session_id,
            "signedFields": signed_fields,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError(format!("pdf service unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| UpstreamError(format!("pdf service rejected request: {e}")))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| UpstreamError(format!("pdf service returned invalid JSON: {e}")))?;
        payload
            .get("url")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| UpstreamError("pdf service response missing url".to_string()))
    }
}

/// Webhook notifier: POST `{to, subject, templateData}` to a configured URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template_data: &Value,
    ) -> Result<(), UpstreamError> {
        let body = json!({
            "to": to,
            "subject": subject,
            "templateData": template_data,
        });
        self.client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| UpstreamError(format!("notifier unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| UpstreamError(format!("notifier rejected request: {e}")))?;
        Ok(())
    }
}

/// Local fallback when no PDF service is configured: a deterministic URL per
/// session, so development flows still exercise the artifact guard.
pub struct LocalArtifactGenerator {
    base_url: String,
}

impl LocalArtifactGenerator {
    pub fn new(base_url: String) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl ArtifactGenerator for LocalArtifactGenerator {
    async fn generate(
        &self,
        session_id: &str,
        _signed_fields: &Value,
    ) -> Result<String, UpstreamError> {
        Ok(format!("{}/artifacts/{}.pdf", self.base_url, session_id))
    }
}

/// Local fallback notifier: logs the dispatch instead of delivering it.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        _template_data: &Value,
    ) -> Result<(), UpstreamError> {
        tracing::info!("notification (log only): to={} subject={}", to, subject);
        Ok(())
    }
}
