//! Publish collaborator contract.
//!
//! The platform adapters themselves live elsewhere — only the result
//! contract matters to the queue processor. Every call carries a stable
//! attempt token so the collaborator can de-duplicate retried calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One publish request for a `(content, platform)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub content_id: String,
    pub platform: String,
    /// Rendered payload handed to the platform adapter.
    pub payload: String,
    /// Stable per-attempt idempotency key.
    pub attempt_token: String,
}

/// Result reported by the publish collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishingResult {
    pub success: bool,
    /// Platform-side identifier of the published item.
    #[serde(default)]
    pub platform_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl PublishingResult {
    pub fn ok(platform_id: &str) -> Self {
        Self {
            success: true,
            platform_id: Some(platform_id.to_string()),
            url: None,
            metrics: HashMap::new(),
            error: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(error: &str) -> Self {
        Self {
            success: false,
            platform_id: None,
            url: None,
            metrics: HashMap::new(),
            error: Some(error.to_string()),
            warnings: Vec::new(),
        }
    }
}

/// External publish collaborator. Must be idempotent per
/// `(content_id, platform, attempt_token)`.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> PublishingResult;
}

/// Read-only lookup of content bodies used to render publish payloads.
pub trait ContentSource: Send + Sync {
    fn body(&self, content_id: &str) -> Option<String>;
}

/// Content source with nothing behind it — payloads fall back to the
/// schedule title.
pub struct NullContentSource;

impl ContentSource for NullContentSource {
    fn body(&self, _content_id: &str) -> Option<String> {
        None
    }
}

/// Dry-run publisher: logs the request and reports success. Default wiring
/// when no webhook endpoint is configured.
pub struct DryRunPublisher;

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, request: &PublishRequest) -> PublishingResult {
        tracing::info!(
            "Dry-run publish: content {} -> {} (token {})",
            request.content_id,
            request.platform,
            request.attempt_token
        );
        PublishingResult::ok(&format!("dry-{}-{}", request.platform, request.content_id))
    }
}

/// Webhook publisher — POSTs the request as JSON and treats 2xx as success.
pub struct WebhookPublisher {
    endpoint: String,
    headers: Vec<(String, String)>,
    client: reqwest::Client,
}

impl WebhookPublisher {
    pub fn new(endpoint: &str, headers: Vec<(String, String)>) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            headers,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Publisher for WebhookPublisher {
    async fn publish(&self, request: &PublishRequest) -> PublishingResult {
        let mut req = self
            .client
            .post(&self.endpoint)
            .json(request)
            .header("X-Attempt-Token", &request.attempt_token)
            .timeout(std::time::Duration::from_secs(30));
        for (key, value) in &self.headers {
            req = req.header(key.as_str(), value.as_str());
        }

        match req.send().await {
            Ok(resp) if resp.status().is_success() => {
                // The adapter may return a structured result body.
                match resp.json::<PublishingResult>().await {
                    Ok(result) => result,
                    Err(_) => PublishingResult::ok(&request.attempt_token),
                }
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                PublishingResult::failed(&format!("publish endpoint returned {status}: {body}"))
            }
            Err(e) => PublishingResult::failed(&format!("publish request failed: {e}")),
        }
    }
}
