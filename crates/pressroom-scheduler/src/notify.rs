//! Workflow notifications — fire-and-forget dispatch plus a queryable
//! in-memory history. Delivery failures are logged and swallowed; they must
//! never roll back a workflow transition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A notification emitted by a workflow transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Event name, e.g. "stage:approval".
    pub event: String,
    pub schedule_id: String,
    pub recipients: Vec<String>,
    pub channels: Vec<String>,
    pub template_id: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// Notification delivery collaborator.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), String>;
}

/// Sink that only logs — used when no webhook is configured.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn notify(&self, notification: &Notification) -> Result<(), String> {
        tracing::info!(
            "Notification [{}] {} -> {}",
            notification.event,
            notification.body,
            notification.recipients.join(", ")
        );
        Ok(())
    }
}

/// Generic HTTP webhook sink — POST with JSON body.
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    async fn notify(&self, notification: &Notification) -> Result<(), String> {
        let resp = self
            .client
            .post(&self.url)
            .json(notification)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| format!("Webhook send failed: {e}"))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("Webhook error {}", resp.status()))
        }
    }
}

/// Records emitted notifications in a bounded ring buffer.
pub struct NotifyRouter {
    history: Vec<Notification>,
}

const HISTORY_CAP: usize = 100;

impl NotifyRouter {
    pub fn new() -> Self {
        Self { history: Vec::new() }
    }

    /// Record a notification in history.
    pub fn record(&mut self, notification: Notification) {
        self.history.push(notification);
        if self.history.len() > HISTORY_CAP {
            self.history.remove(0);
        }
    }

    pub fn history(&self) -> &[Notification] {
        &self.history
    }
}

impl Default for NotifyRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatch without awaiting the outcome in the caller's path. Failures
/// are logged, never propagated. Outside a runtime the dispatch is dropped
/// with a warning — history still records the notification.
pub fn dispatch_detached(sink: std::sync::Arc<dyn NotificationSink>, notification: Notification) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        tracing::warn!("No async runtime; notification '{}' not dispatched", notification.event);
        return;
    };
    handle.spawn(async move {
        if let Err(e) = sink.notify(&notification).await {
            tracing::warn!("Notification delivery failed ({}): {e}", notification.event);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(event: &str) -> Notification {
        Notification {
            event: event.to_string(),
            schedule_id: "s1".into(),
            recipients: vec!["editors".into()],
            channels: vec!["dashboard".into()],
            template_id: "t1".into(),
            body: "hello".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_history_ring_buffer() {
        let mut router = NotifyRouter::new();
        for i in 0..150 {
            router.record(note(&format!("e{i}")));
        }
        assert_eq!(router.history().len(), 100);
        assert_eq!(router.history()[0].event, "e50");
    }
}
