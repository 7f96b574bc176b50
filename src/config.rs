//! Monitoring configuration.
//!
//! Lives for the process lifetime and is updated through a typed patch:
//! every leaf is optional, nested sections merge field-by-field, and vectors
//! replace wholesale. There is no semantic validation of threshold values; a
//! zero threshold degenerates to "always fire", which is an operator error
//! rather than a fault.

use crate::types::AlertSeverity;
use serde::{Deserialize, Serialize};

/// Detection thresholds. Each rule's window is fixed by the rule; the count
/// that trips it is configured here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub failed_logins_per_minute: u32,
    pub failed_logins_per_hour: u32,
    pub rate_limit_violations_per_minute: u32,
    pub csp_violations_per_minute: u32,
    pub admin_actions_per_hour: u32,
    pub mass_data_access_threshold: u32,
    pub suspicious_ip_threshold: u32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            failed_logins_per_minute: 5,
            failed_logins_per_hour: 20,
            rate_limit_violations_per_minute: 10,
            csp_violations_per_minute: 10,
            admin_actions_per_hour: 50,
            mass_data_access_threshold: 100,
            suspicious_ip_threshold: 3,
        }
    }
}

/// Where alert notifications go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelKind {
    /// Generic JSON webhook.
    Webhook,
    /// Slack incoming webhook.
    Slack,
    /// Structured log record, picked up by the log pipeline.
    Log,
}

/// One configured notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub name: String,
    pub kind: ChannelKind,
    /// Required for `Webhook` and `Slack`, ignored for `Log`.
    pub url: Option<String>,
    pub min_severity: AlertSeverity,
    pub enabled: bool,
}

impl NotificationChannel {
    /// The default channel set: a structured log record for every alert.
    pub fn log_only() -> Vec<Self> {
        vec![Self {
            name: "log".to_string(),
            kind: ChannelKind::Log,
            url: None,
            min_severity: AlertSeverity::Low,
            enabled: true,
        }]
    }
}

/// Alerting behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertingConfig {
    pub enabled: bool,
    pub channels: Vec<NotificationChannel>,
    pub suppress_duplicate_minutes: u32,
    pub escalation_timeout_minutes: u32,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: NotificationChannel::log_only(),
            suppress_duplicate_minutes: 10,
            escalation_timeout_minutes: 30,
        }
    }
}

/// How long derived state is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub alert_retention_days: u32,
    pub metrics_retention_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            alert_retention_days: 90,
            metrics_retention_days: 365,
        }
    }
}

/// Top-level monitoring configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub thresholds: ThresholdConfig,
    pub alerting: AlertingConfig,
    pub retention: RetentionConfig,
}

impl MonitoringConfig {
    /// The suppression window as a duration.
    pub fn suppression_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.alerting.suppress_duplicate_minutes))
    }
}

/// Partial update for [`ThresholdConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThresholdPatch {
    pub failed_logins_per_minute: Option<u32>,
    pub failed_logins_per_hour: Option<u32>,
    pub rate_limit_violations_per_minute: Option<u32>,
    pub csp_violations_per_minute: Option<u32>,
    pub admin_actions_per_hour: Option<u32>,
    pub mass_data_access_threshold: Option<u32>,
    pub suspicious_ip_threshold: Option<u32>,
}

impl ThresholdPatch {
    fn apply(&self, config: &mut ThresholdConfig) {
        if let Some(v) = self.failed_logins_per_minute {
            config.failed_logins_per_minute = v;
        }
        if let Some(v) = self.failed_logins_per_hour {
            config.failed_logins_per_hour = v;
        }
        if let Some(v) = self.rate_limit_violations_per_minute {
            config.rate_limit_violations_per_minute = v;
        }
        if let Some(v) = self.csp_violations_per_minute {
            config.csp_violations_per_minute = v;
        }
        if let Some(v) = self.admin_actions_per_hour {
            config.admin_actions_per_hour = v;
        }
        if let Some(v) = self.mass_data_access_threshold {
            config.mass_data_access_threshold = v;
        }
        if let Some(v) = self.suspicious_ip_threshold {
            config.suspicious_ip_threshold = v;
        }
    }
}

/// Partial update for [`AlertingConfig`]. The channel list replaces
/// wholesale; there is no per-channel merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertingPatch {
    pub enabled: Option<bool>,
    pub channels: Option<Vec<NotificationChannel>>,
    pub suppress_duplicate_minutes: Option<u32>,
    pub escalation_timeout_minutes: Option<u32>,
}

impl AlertingPatch {
    fn apply(&self, config: &mut AlertingConfig) {
        if let Some(v) = self.enabled {
            config.enabled = v;
        }
        if let Some(v) = &self.channels {
            config.channels = v.clone();
        }
        if let Some(v) = self.suppress_duplicate_minutes {
            config.suppress_duplicate_minutes = v;
        }
        if let Some(v) = self.escalation_timeout_minutes {
            config.escalation_timeout_minutes = v;
        }
    }
}

/// Partial update for [`RetentionConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionPatch {
    pub alert_retention_days: Option<u32>,
    pub metrics_retention_days: Option<u32>,
}

impl RetentionPatch {
    fn apply(&self, config: &mut RetentionConfig) {
        if let Some(v) = self.alert_retention_days {
            config.alert_retention_days = v;
        }
        if let Some(v) = self.metrics_retention_days {
            config.metrics_retention_days = v;
        }
    }
}

/// Typed partial update for [`MonitoringConfig`]. Absent fields leave the
/// current value untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringConfigPatch {
    pub thresholds: Option<ThresholdPatch>,
    pub alerting: Option<AlertingPatch>,
    pub retention: Option<RetentionPatch>,
}

impl MonitoringConfigPatch {
    pub fn apply(&self, config: &mut MonitoringConfig) {
        if let Some(patch) = &self.thresholds {
            patch.apply(&mut config.thresholds);
        }
        if let Some(patch) = &self.alerting {
            patch.apply(&mut config.alerting);
        }
        if let Some(patch) = &self.retention {
            patch.apply(&mut config.retention);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = MonitoringConfig::default();
        assert_eq!(config.thresholds.failed_logins_per_minute, 5);
        assert_eq!(config.alerting.suppress_duplicate_minutes, 10);
        assert_eq!(config.retention.alert_retention_days, 90);
        assert!(config.alerting.enabled);
        assert_eq!(config.alerting.channels.len(), 1);
    }

    #[test]
    fn patch_merges_nested_fields_individually() {
        let mut config = MonitoringConfig::default();
        let patch = MonitoringConfigPatch {
            thresholds: Some(ThresholdPatch {
                failed_logins_per_minute: Some(3),
                ..Default::default()
            }),
            ..Default::default()
        };
        patch.apply(&mut config);

        assert_eq!(config.thresholds.failed_logins_per_minute, 3);
        // Untouched siblings keep their values.
        assert_eq!(config.thresholds.admin_actions_per_hour, 50);
        assert_eq!(config.retention.alert_retention_days, 90);
    }

    #[test]
    fn patch_replaces_channel_list_wholesale() {
        let mut config = MonitoringConfig::default();
        let patch = MonitoringConfigPatch {
            alerting: Some(AlertingPatch {
                channels: Some(vec![NotificationChannel {
                    name: "ops-webhook".to_string(),
                    kind: ChannelKind::Webhook,
                    url: Some("https://ops.example.com/hook".to_string()),
                    min_severity: AlertSeverity::High,
                    enabled: true,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        patch.apply(&mut config);

        assert_eq!(config.alerting.channels.len(), 1);
        assert_eq!(config.alerting.channels[0].name, "ops-webhook");
        // Scalars in the same section are untouched.
        assert_eq!(config.alerting.suppress_duplicate_minutes, 10);
    }

    #[test]
    fn empty_patch_is_a_no_op() {
        let mut config = MonitoringConfig::default();
        let before = config.clone();
        MonitoringConfigPatch::default().apply(&mut config);
        assert_eq!(config, before);
    }
}
