//! Alert lifecycle: suppression, creation, acknowledgment, export, retention.
//!
//! The alert list is the single source of truth for "what is currently
//! actionable". Admission (suppression check plus insert) happens under one
//! write lock, which serializes creation per suppression key.

use crate::types::{
    AlertCandidate, AlertSeverity, ExportFormat, SecurityAlert, TimeRange,
};
use crate::errors::SecurityMonitoringError;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

/// Owns stored alerts and their lifecycle.
#[derive(Default)]
pub struct AlertManager {
    alerts: RwLock<Vec<SecurityAlert>>,
    suppressed_total: AtomicU64,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a candidate unless a duplicate was stored within the
    /// suppression window. Duplicates share the alert type and source IP;
    /// candidates without an IP suppress against other IP-less alerts of the
    /// same type.
    ///
    /// Returns the stored alert, or `None` when suppressed.
    pub async fn create_alert(
        &self,
        candidate: AlertCandidate,
        suppression_window: Duration,
    ) -> Option<SecurityAlert> {
        let now = Utc::now();
        let cutoff = now - suppression_window;

        let mut alerts = self.alerts.write().await;
        let duplicate = alerts.iter().rev().any(|a| {
            a.alert_type == candidate.alert_type
                && a.context.ip_address == candidate.context.ip_address
                && a.timestamp > cutoff
        });
        if duplicate {
            self.suppressed_total.fetch_add(1, Ordering::Relaxed);
            debug!(
                alert_type = %candidate.alert_type,
                ip = ?candidate.context.ip_address,
                "duplicate alert suppressed"
            );
            return None;
        }

        let alert = SecurityAlert {
            id: Uuid::new_v4(),
            timestamp: now,
            severity: candidate.severity,
            alert_type: candidate.alert_type,
            title: candidate.title,
            description: candidate.description,
            event_type: candidate.event_type,
            context: candidate.context,
            metadata: candidate.metadata,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
        };
        alerts.push(alert.clone());

        info!(
            alert_id = %alert.id,
            alert_type = %alert.alert_type,
            severity = %alert.severity,
            "security alert created: {}",
            alert.title
        );
        Some(alert)
    }

    /// Marks the alert acknowledged. Unknown ids return `false` and leave
    /// state unchanged; re-acknowledging overwrites the actor and timestamp.
    pub async fn acknowledge_alert(&self, alert_id: Uuid, acknowledged_by: &str) -> bool {
        let mut alerts = self.alerts.write().await;
        let Some(alert) = alerts.iter_mut().find(|a| a.id == alert_id) else {
            return false;
        };
        alert.acknowledged = true;
        alert.acknowledged_by = Some(acknowledged_by.to_string());
        alert.acknowledged_at = Some(Utc::now());
        info!(alert_id = %alert_id, acknowledged_by, "alert acknowledged");
        true
    }

    /// Unacknowledged alerts in insertion order, optionally filtered by
    /// severity.
    pub async fn active_alerts(&self, severity: Option<AlertSeverity>) -> Vec<SecurityAlert> {
        let alerts = self.alerts.read().await;
        alerts
            .iter()
            .filter(|a| !a.acknowledged)
            .filter(|a| severity.map_or(true, |s| a.severity == s))
            .cloned()
            .collect()
    }

    /// A consistent snapshot of every stored alert.
    pub async fn snapshot(&self) -> Vec<SecurityAlert> {
        self.alerts.read().await.clone()
    }

    /// Renders alerts whose timestamp falls in the range.
    pub async fn export_alerts(
        &self,
        format: ExportFormat,
        range: &TimeRange,
    ) -> Result<String, SecurityMonitoringError> {
        let alerts = self.alerts.read().await;
        let in_range: Vec<&SecurityAlert> = alerts
            .iter()
            .filter(|a| range.contains(a.timestamp))
            .collect();

        match format {
            ExportFormat::Json => Ok(serde_json::to_string_pretty(&in_range)?),
            ExportFormat::Csv => Ok(render_csv(&in_range)),
        }
    }

    /// Drops alerts older than the retention horizon. Returns how many were
    /// removed.
    pub async fn cleanup_old_alerts(&self, retention_days: u32) -> usize {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        let mut alerts = self.alerts.write().await;
        let before = alerts.len();
        alerts.retain(|a| a.timestamp > cutoff);
        let removed = before - alerts.len();
        if removed > 0 {
            info!(removed, "expired alerts dropped");
        }
        removed
    }

    /// Alerts dropped by suppression since startup.
    pub fn suppressed_total(&self) -> u64 {
        self.suppressed_total.load(Ordering::Relaxed)
    }
}

fn render_csv(alerts: &[&SecurityAlert]) -> String {
    let mut out = String::from(
        "id,timestamp,severity,alert_type,title,description,event_type,ip_address,user_id,acknowledged\n",
    );
    for alert in alerts {
        let ip = alert
            .context
            .ip_address
            .map_or(String::new(), |ip| ip.to_string());
        let user = alert.context.user_id.as_deref().unwrap_or("");
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{}\n",
            alert.id,
            alert.timestamp.to_rfc3339(),
            alert.severity,
            alert.alert_type,
            csv_quote(&alert.title),
            csv_quote(&alert.description),
            alert.event_type,
            ip,
            user,
            alert.acknowledged,
        ));
    }
    out
}

/// Wraps a free-text field in double quotes, doubling embedded quotes.
fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}
