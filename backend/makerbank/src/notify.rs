//! Notification collaborator.
//!
//! Delivery is fire-and-forget: the ledger commits first, then notifies, and a
//! failed delivery is only logged.

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

pub trait Notifier: Send + Sync {
    fn notify(&self, target_id: i64, text: String);
}

/// Writes notifications to the log. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, target_id: i64, text: String) {
        info!(target_id, "notification: {text}");
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    target_id: i64,
    text: &'a str,
}

/// POSTs each notification as JSON to a chat gateway.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, target_id: i64, text: String) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            let result = client
                .post(&url)
                .json(&WebhookPayload {
                    target_id,
                    text: &text,
                })
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            if let Err(e) = result {
                warn!(target_id, "notification delivery failed: {e}");
            }
        });
    }
}

/// Captures notifications for assertions.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingNotifier(std::sync::Mutex<Vec<(i64, String)>>);

#[cfg(test)]
impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(i64, String)> {
        self.0.lock().unwrap().clone()
    }

    pub fn sent_to(&self, target_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(target, _)| *target == target_id)
            .map(|(_, text)| text)
            .collect()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, target_id: i64, text: String) {
        self.0.lock().unwrap().push((target_id, text));
    }
}
