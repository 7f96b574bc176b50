#![forbid(unsafe_code)]
#![deny(rust_2018_idioms, future_incompatible)]
//! Security event monitoring and threat detection engine
//!
//! This crate implements the security posture subsystem of the chat-analytics
//! platform: it ingests security-relevant events (authentication attempts,
//! rate-limit hits, admin actions, CSP violations), keeps a short-horizon
//! in-memory window of recent activity, applies threshold- and baseline-based
//! detectors, and emits de-duplicated, severity-ranked alerts. Aggregate
//! metrics (security score, threat level, per-user risk, per-IP assessment)
//! are computed on demand for the operator dashboard.
//!
//! The persistent audit-log store and the notification channels are injected
//! dependencies ([`AuditStore`], [`NotificationSender`]); this crate owns no
//! storage of its own beyond the bounded in-memory buffers.

pub mod alert_manager;
pub mod audit_store;
pub mod config;
pub mod errors;
pub mod event_buffer;
pub mod metrics;
pub mod monitor;
pub mod notifications;
pub mod threat_detector;
pub mod types;

pub use alert_manager::AlertManager;
pub use audit_store::{AuditRecord, AuditStore, EventQuery, InMemoryAuditStore};
pub use config::{
    AlertingConfig, AlertingPatch, ChannelKind, MonitoringConfig, MonitoringConfigPatch,
    NotificationChannel, RetentionConfig, RetentionPatch, ThresholdConfig, ThresholdPatch,
};
pub use errors::{AuditStoreError, NotificationError, SecurityMonitoringError};
pub use event_buffer::EventBuffer;
pub use metrics::{IpThreatAssessment, MetricsService, SecurityMetrics, UserRiskScore};
pub use monitor::SecurityMonitor;
pub use notifications::{NotificationDispatcher, NotificationSender};
pub use threat_detector::ThreatDetector;
pub use types::{
    AlertCandidate, AlertSeverity, AlertType, AnomalyKind, AnomalyVerdict, EventContext,
    EventOutcome, EventSeverity, ExportFormat, SecurityAlert, SecurityEvent, SecurityEventType,
    ThreatLevel, TimeRange,
};
