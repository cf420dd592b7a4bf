use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::Notification;
use crate::ports::Notifier;

/// Writes notifications to the log. Used when no downstream URL is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        tracing::info!(
            kind = notification.kind(),
            payload = %serde_json::to_string(notification)?,
            "Notification"
        );
        Ok(())
    }
}

/// Posts each notification as JSON to a downstream endpoint.
pub struct HttpNotifier {
    client: Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, url }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .json(notification)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Delivers notifications off the request path. Delivery failures are
/// logged and never reach the operation that committed the change.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn dispatch(&self, notification: Notification) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(&notification).await {
                tracing::warn!(kind = notification.kind(), error = %e, "Notification delivery failed");
            }
        });
    }
}
