//! Alert notification channels.
//!
//! Dispatch is best-effort: a failing channel is logged and skipped, never
//! retried in-process, and never fails alert creation.

use crate::config::{ChannelKind, NotificationChannel};
use crate::errors::NotificationError;
use crate::types::{AlertSeverity, SecurityAlert};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A single notification channel.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, alert: &SecurityAlert) -> Result<(), NotificationError>;

    fn name(&self) -> &str;

    /// Alerts below this severity are skipped for the channel.
    fn min_severity(&self) -> AlertSeverity {
        AlertSeverity::Low
    }
}

/// Emits a structured log record per alert, for pickup by the log pipeline.
pub struct LogSender {
    min_severity: AlertSeverity,
}

impl LogSender {
    pub fn new(min_severity: AlertSeverity) -> Self {
        Self { min_severity }
    }
}

#[async_trait]
impl NotificationSender for LogSender {
    async fn send(&self, alert: &SecurityAlert) -> Result<(), NotificationError> {
        info!(
            target: "security_alert",
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            event_type = %alert.event_type,
            ip = ?alert.context.ip_address,
            user_id = ?alert.context.user_id,
            company_id = ?alert.context.company_id,
            "{}", alert.title
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }

    fn min_severity(&self) -> AlertSeverity {
        self.min_severity
    }
}

/// Posts the alert as JSON to a generic webhook.
pub struct WebhookSender {
    name: String,
    url: String,
    min_severity: AlertSeverity,
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(name: String, url: String, min_severity: AlertSeverity) -> Self {
        Self {
            name,
            url,
            min_severity,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(&self, alert: &SecurityAlert) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .map_err(|e| NotificationError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn min_severity(&self) -> AlertSeverity {
        self.min_severity
    }
}

/// Posts a formatted attachment to a Slack incoming webhook.
pub struct SlackSender {
    name: String,
    webhook_url: String,
    min_severity: AlertSeverity,
    client: reqwest::Client,
}

impl SlackSender {
    pub fn new(name: String, webhook_url: String, min_severity: AlertSeverity) -> Self {
        Self {
            name,
            webhook_url,
            min_severity,
            client: reqwest::Client::new(),
        }
    }

    fn payload(&self, alert: &SecurityAlert) -> serde_json::Value {
        let color = match alert.severity {
            AlertSeverity::Critical | AlertSeverity::High => "danger",
            AlertSeverity::Medium => "warning",
            AlertSeverity::Low => "good",
        };
        json!({
            "text": format!("Security alert: {}", alert.title),
            "attachments": [{
                "color": color,
                "fields": [
                    { "title": "Severity", "value": alert.severity.to_string(), "short": true },
                    { "title": "Type", "value": alert.alert_type.to_string(), "short": true },
                    {
                        "title": "Source IP",
                        "value": alert.context.ip_address
                            .map_or("n/a".to_string(), |ip| ip.to_string()),
                        "short": true
                    },
                    {
                        "title": "Timestamp",
                        "value": alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                        "short": true
                    },
                    { "title": "Description", "value": alert.description.clone(), "short": false }
                ],
                "ts": alert.timestamp.timestamp()
            }]
        })
    }
}

#[async_trait]
impl NotificationSender for SlackSender {
    async fn send(&self, alert: &SecurityAlert) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.payload(alert))
            .send()
            .await
            .map_err(|e| NotificationError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn min_severity(&self) -> AlertSeverity {
        self.min_severity
    }
}

/// Fans an alert out to every configured channel.
pub struct NotificationDispatcher {
    senders: Vec<Arc<dyn NotificationSender>>,
}

impl NotificationDispatcher {
    pub fn new(senders: Vec<Arc<dyn NotificationSender>>) -> Self {
        Self { senders }
    }

    /// Builds senders from the configured channel list. Channels missing a
    /// required URL are skipped with a warning.
    pub fn from_channels(channels: &[NotificationChannel]) -> Self {
        let mut senders: Vec<Arc<dyn NotificationSender>> = Vec::new();
        for channel in channels.iter().filter(|c| c.enabled) {
            match channel.kind {
                ChannelKind::Log => {
                    senders.push(Arc::new(LogSender::new(channel.min_severity)));
                }
                ChannelKind::Webhook => match &channel.url {
                    Some(url) => senders.push(Arc::new(WebhookSender::new(
                        channel.name.clone(),
                        url.clone(),
                        channel.min_severity,
                    ))),
                    None => {
                        warn!(channel = %channel.name, "webhook channel has no url, skipping")
                    }
                },
                ChannelKind::Slack => match &channel.url {
                    Some(url) => senders.push(Arc::new(SlackSender::new(
                        channel.name.clone(),
                        url.clone(),
                        channel.min_severity,
                    ))),
                    None => {
                        warn!(channel = %channel.name, "slack channel has no url, skipping")
                    }
                },
            }
        }
        Self { senders }
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }

    /// Sends the alert to every channel whose severity floor it meets.
    /// Failures are logged and swallowed.
    pub async fn dispatch(&self, alert: &SecurityAlert) {
        for sender in &self.senders {
            if alert.severity < sender.min_severity() {
                continue;
            }
            match sender.send(alert).await {
                Ok(()) => {
                    debug!(channel = sender.name(), alert_id = %alert.id, "alert delivered")
                }
                Err(e) => {
                    error!(
                        channel = sender.name(),
                        alert_id = %alert.id,
                        error = %e,
                        "failed to deliver alert"
                    );
                }
            }
        }
    }
}
