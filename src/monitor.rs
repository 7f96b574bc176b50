//! Monitoring coordinator.
//!
//! [`SecurityMonitor`] is the façade the rest of the platform calls: every
//! security-relevant action reports through [`SecurityMonitor::log_security_event`]
//! (or [`SecurityMonitor::process_security_event`] when the audit write
//! happened elsewhere), and the admin dashboard reads posture through the
//! query methods. The service object is constructed once at startup with its
//! dependencies injected and shut down explicitly; there is no global
//! instance.

use crate::alert_manager::AlertManager;
use crate::audit_store::{AuditRecord, AuditStore};
use crate::config::{MonitoringConfig, MonitoringConfigPatch};
use crate::errors::SecurityMonitoringError;
use crate::event_buffer::EventBuffer;
use crate::metrics::{IpThreatAssessment, MetricsService, SecurityMetrics};
use crate::notifications::NotificationDispatcher;
use crate::threat_detector::ThreatDetector;
use crate::types::{
    AlertCandidate, AlertSeverity, AlertType, AnomalyKind, EventContext, EventOutcome,
    EventSeverity, ExportFormat, SecurityAlert, SecurityEvent, SecurityEventType, TimeRange,
};
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events per minute above which the buffer scan raises a volume-spike
/// alert.
const VOLUME_SPIKE_EVENTS_PER_MINUTE: usize = 50;

/// Cadence of the retention cleanup task.
const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(300);

/// Cadence of the buffer-scan task.
const SCAN_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// The alert admission path shared by the ingest pipeline and the background
/// scan: suppression-checked storage, then fire-and-forget traceability and
/// notification fan-out.
#[derive(Clone)]
struct AlertPipeline {
    config: Arc<RwLock<MonitoringConfig>>,
    alerts: Arc<AlertManager>,
    store: Arc<dyn AuditStore>,
    dispatcher: Arc<RwLock<Arc<NotificationDispatcher>>>,
}

impl AlertPipeline {
    async fn create_alert(&self, candidate: AlertCandidate) {
        let (enabled, window) = {
            let config = self.config.read().await;
            (config.alerting.enabled, config.suppression_window())
        };

        let Some(alert) = self.alerts.create_alert(candidate, window).await else {
            return;
        };

        // Store write and notification fan-out happen off the ingest path,
        // without holding any monitor lock.
        let store = self.store.clone();
        let trace = alert_trace_record(&alert, "security_alert_created");
        tokio::spawn(async move {
            if let Err(e) = store.append(trace).await {
                warn!(error = %e, "alert trace write failed");
            }
        });

        if enabled {
            let dispatcher = self.dispatcher.read().await.clone();
            if !dispatcher.is_empty() {
                tokio::spawn(async move {
                    dispatcher.dispatch(&alert).await;
                });
            }
        }
    }
}

/// Long-lived coordinator owning the monitoring state and scheduler.
pub struct SecurityMonitor {
    pipeline: AlertPipeline,
    buffer: Arc<EventBuffer>,
    detector: ThreatDetector,
    metrics: MetricsService,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SecurityMonitor {
    /// Builds the monitor with its dependencies injected. Call
    /// [`SecurityMonitor::start`] to launch the background scheduler.
    pub fn new(store: Arc<dyn AuditStore>, config: MonitoringConfig) -> Self {
        let dispatcher = NotificationDispatcher::from_channels(&config.alerting.channels);
        Self {
            pipeline: AlertPipeline {
                config: Arc::new(RwLock::new(config)),
                alerts: Arc::new(AlertManager::new()),
                store: store.clone(),
                dispatcher: Arc::new(RwLock::new(Arc::new(dispatcher))),
            },
            buffer: Arc::new(EventBuffer::new()),
            detector: ThreatDetector::new(store.clone()),
            metrics: MetricsService::new(store),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Launches the cleanup and buffer-scan tasks. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("security monitor already running");
            return;
        }

        let mut tasks = self.tasks.lock().await;

        let running = self.running.clone();
        let pipeline = self.pipeline.clone();
        let buffer = self.buffer.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
            interval.tick().await; // the first tick fires immediately
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                let retention_days = pipeline.config.read().await.retention.alert_retention_days;
                pipeline.alerts.cleanup_old_alerts(retention_days).await;
                buffer.cleanup().await;
                debug!("cleanup tick complete");
            }
        }));

        let running = self.running.clone();
        let pipeline = self.pipeline.clone();
        let buffer = self.buffer.clone();
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(SCAN_INTERVAL);
            interval.tick().await;
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                scan_for_volume_spike(&buffer, &pipeline).await;
            }
        }));

        info!("security monitoring started");
    }

    /// Stops the background tasks. Ingest and query methods keep working.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("security monitoring stopped");
    }

    /// Records one security event: buffers it, runs the detectors, and files
    /// any resulting alerts. Never fails; detector errors degrade to "no
    /// threat" so the caller's primary operation is unaffected.
    pub async fn process_security_event(
        &self,
        event_type: SecurityEventType,
        outcome: EventOutcome,
        context: EventContext,
        severity: EventSeverity,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) {
        let mut context = context;
        if let Some(extra) = metadata {
            context.metadata.extend(extra);
        }
        let event = SecurityEvent::new(event_type, outcome, severity, context);
        self.process_event(event).await;
    }

    async fn process_event(&self, event: SecurityEvent) {
        self.buffer.add_event(event.clone()).await;

        let thresholds = self.pipeline.config.read().await.thresholds.clone();
        let threats = self
            .detector
            .detect_immediate_threats(&event, &thresholds)
            .await;
        for candidate in threats {
            self.pipeline.create_alert(candidate).await;
        }

        let verdict = self.detector.detect_anomalies(&event, &self.buffer).await;
        if verdict.is_anomaly && verdict.confidence > 0.7 {
            let alert_type = match verdict.kind {
                Some(AnomalyKind::Temporal) => AlertType::TemporalAnomaly,
                _ => AlertType::GeolocationAnomaly,
            };
            let mut metadata = HashMap::new();
            metadata.insert("confidence".to_string(), json!(verdict.confidence));
            metadata.insert(
                "recommended_actions".to_string(),
                json!(verdict.recommended_actions),
            );
            self.pipeline
                .create_alert(AlertCandidate {
                    alert_type,
                    severity: verdict.severity(),
                    title: "Anomalous access pattern".to_string(),
                    description: verdict.description,
                    event_type: event.event_type,
                    context: event.context.clone(),
                    metadata,
                })
                .await;
        }

        self.buffer.cleanup().await;
    }

    /// Writes the event to the historical audit store, then feeds it through
    /// the detection pipeline. Record and in-memory event share a timestamp,
    /// so baseline queries bounded at the event timestamp never see the
    /// event itself. The store write is best-effort: a failure is logged and
    /// monitoring still sees the event.
    #[allow(clippy::too_many_arguments)]
    pub async fn log_security_event(
        &self,
        event_type: SecurityEventType,
        action: &str,
        outcome: EventOutcome,
        context: EventContext,
        severity: EventSeverity,
        error_message: Option<String>,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) {
        let mut context = context;
        if let Some(extra) = &metadata {
            context.metadata.extend(extra.clone());
        }
        let event = SecurityEvent::new(event_type, outcome, severity, context);

        let record = AuditRecord {
            timestamp: event.timestamp,
            event_type,
            action: action.to_string(),
            outcome,
            severity,
            context: event.context.clone(),
            error_message,
            metadata: metadata.unwrap_or_default(),
        };
        if let Err(e) = self.pipeline.store.append(record).await {
            warn!(error = %e, action, "audit store write failed");
        }

        self.process_event(event).await;
    }

    /// Aggregate posture over the range, optionally scoped to one tenant.
    pub async fn security_metrics(
        &self,
        range: &TimeRange,
        company_id: Option<&str>,
    ) -> Result<SecurityMetrics, SecurityMonitoringError> {
        let alerts = self.pipeline.alerts.snapshot().await;
        self.metrics
            .security_metrics(range, company_id, &alerts)
            .await
    }

    /// Unacknowledged alerts, optionally filtered by severity.
    pub async fn active_alerts(&self, severity: Option<AlertSeverity>) -> Vec<SecurityAlert> {
        self.pipeline.alerts.active_alerts(severity).await
    }

    /// Acknowledges an alert; `false` for unknown ids. Acknowledgment is
    /// written back to the audit store for traceability.
    pub async fn acknowledge_alert(&self, alert_id: Uuid, acknowledged_by: &str) -> bool {
        let acknowledged = self
            .pipeline
            .alerts
            .acknowledge_alert(alert_id, acknowledged_by)
            .await;
        if acknowledged {
            let store = self.pipeline.store.clone();
            let mut context = EventContext {
                user_id: Some(acknowledged_by.to_string()),
                ..Default::default()
            };
            context
                .metadata
                .insert("alert_id".to_string(), json!(alert_id.to_string()));
            let record = AuditRecord {
                timestamp: Utc::now(),
                event_type: SecurityEventType::SystemConfig,
                action: "security_alert_acknowledged".to_string(),
                outcome: EventOutcome::Success,
                severity: EventSeverity::Info,
                context,
                error_message: None,
                metadata: HashMap::new(),
            };
            tokio::spawn(async move {
                if let Err(e) = store.append(record).await {
                    warn!(error = %e, "acknowledgment trace write failed");
                }
            });
        }
        acknowledged
    }

    /// Exports alerts in the range as JSON or CSV.
    pub async fn export_security_data(
        &self,
        format: ExportFormat,
        range: &TimeRange,
    ) -> Result<String, SecurityMonitoringError> {
        self.pipeline.alerts.export_alerts(format, range).await
    }

    /// Risk assessment for one IP over the trailing 24 hours.
    pub async fn ip_threat_assessment(
        &self,
        ip: IpAddr,
    ) -> Result<IpThreatAssessment, SecurityMonitoringError> {
        self.metrics.ip_threat_assessment(ip).await
    }

    /// A copy of the current configuration.
    pub async fn config(&self) -> MonitoringConfig {
        self.pipeline.config.read().await.clone()
    }

    /// Applies a typed partial update. The notification channel set is
    /// rebuilt when the patch touches it.
    pub async fn update_config(&self, patch: MonitoringConfigPatch) {
        let channels_changed = patch
            .alerting
            .as_ref()
            .is_some_and(|a| a.channels.is_some());

        let mut config = self.pipeline.config.write().await;
        patch.apply(&mut config);
        if channels_changed {
            let dispatcher = NotificationDispatcher::from_channels(&config.alerting.channels);
            *self.pipeline.dispatcher.write().await = Arc::new(dispatcher);
        }
        info!("monitoring configuration updated");
    }

    /// The alert manager's suppression counter, for operator dashboards.
    pub fn suppressed_alerts(&self) -> u64 {
        self.pipeline.alerts.suppressed_total()
    }
}

/// Raises a volume-spike alert when the buffer saw more events in the last
/// minute than the spike threshold.
async fn scan_for_volume_spike(buffer: &EventBuffer, pipeline: &AlertPipeline) {
    let recent = buffer.count_matching(Duration::minutes(1), |_| true).await;
    if recent <= VOLUME_SPIKE_EVENTS_PER_MINUTE {
        return;
    }

    warn!(events = recent, "event volume spike in the last minute");
    let mut metadata = HashMap::new();
    metadata.insert("events_last_minute".to_string(), json!(recent));
    metadata.insert(
        "threshold".to_string(),
        json!(VOLUME_SPIKE_EVENTS_PER_MINUTE),
    );
    pipeline
        .create_alert(AlertCandidate {
            alert_type: AlertType::SuspiciousIpActivity,
            severity: AlertSeverity::Medium,
            title: "Event volume spike".to_string(),
            description: format!(
                "{recent} security events observed in the last minute (threshold {VOLUME_SPIKE_EVENTS_PER_MINUTE})"
            ),
            event_type: SecurityEventType::ApiSecurity,
            context: EventContext::default(),
            metadata,
        })
        .await;
}

fn alert_trace_record(alert: &SecurityAlert, action: &str) -> AuditRecord {
    let mut metadata = HashMap::new();
    metadata.insert("alert_id".to_string(), json!(alert.id.to_string()));
    metadata.insert("alert_type".to_string(), json!(alert.alert_type.to_string()));
    metadata.insert("severity".to_string(), json!(alert.severity.to_string()));
    AuditRecord {
        timestamp: Utc::now(),
        event_type: SecurityEventType::SystemConfig,
        action: action.to_string(),
        outcome: EventOutcome::Success,
        severity: EventSeverity::Info,
        context: alert.context.clone(),
        error_message: None,
        metadata,
    }
}
