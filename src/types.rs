//! Core event and alert model.
//!
//! Every dimension of an event (origin category, outcome, severity) and of an
//! alert (severity, threat category) is a closed enum so rule dispatch and
//! severity comparisons are checked at compile time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use uuid::Uuid;

/// Origin category of a security-relevant event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityEventType {
    Authentication,
    Authorization,
    UserManagement,
    CompanyManagement,
    RateLimiting,
    Csrf,
    SecurityHeaders,
    PasswordReset,
    PlatformAdmin,
    DataPrivacy,
    SystemConfig,
    ApiSecurity,
}

impl SecurityEventType {
    /// Categories that count toward the admin-activity threshold.
    pub fn is_admin_category(self) -> bool {
        matches!(self, Self::PlatformAdmin | Self::UserManagement)
    }
}

impl fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::UserManagement => "user_management",
            Self::CompanyManagement => "company_management",
            Self::RateLimiting => "rate_limiting",
            Self::Csrf => "csrf",
            Self::SecurityHeaders => "security_headers",
            Self::PasswordReset => "password_reset",
            Self::PlatformAdmin => "platform_admin",
            Self::DataPrivacy => "data_privacy",
            Self::SystemConfig => "system_config",
            Self::ApiSecurity => "api_security",
        };
        f.write_str(label)
    }
}

/// How the observed action ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventOutcome {
    Success,
    Failure,
    Blocked,
    RateLimited,
    Suspicious,
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Blocked => "blocked",
            Self::RateLimited => "rate_limited",
            Self::Suspicious => "suspicious",
        };
        f.write_str(label)
    }
}

/// Event severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum EventSeverity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// Alert severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Threat categories an alert can be filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    BruteForceAttack,
    CredentialStuffing,
    AccountTakeover,
    RateLimitBreach,
    CsrfAttack,
    CspViolationSpike,
    GeolocationAnomaly,
    TemporalAnomaly,
    UnusualAdminActivity,
    PrivilegeEscalation,
    MassDataAccess,
    DataBreachAttempt,
    SuspiciousIpActivity,
    PasswordResetAbuse,
    SessionHijacking,
}

impl AlertType {
    /// Categories that indicate an attack on data or privileges rather than
    /// noise; these weigh extra in the security score.
    pub fn is_high_risk(self) -> bool {
        matches!(
            self,
            Self::BruteForceAttack | Self::DataBreachAttempt | Self::PrivilegeEscalation
        )
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BruteForceAttack => "brute_force_attack",
            Self::CredentialStuffing => "credential_stuffing",
            Self::AccountTakeover => "account_takeover",
            Self::RateLimitBreach => "rate_limit_breach",
            Self::CsrfAttack => "csrf_attack",
            Self::CspViolationSpike => "csp_violation_spike",
            Self::GeolocationAnomaly => "geolocation_anomaly",
            Self::TemporalAnomaly => "temporal_anomaly",
            Self::UnusualAdminActivity => "unusual_admin_activity",
            Self::PrivilegeEscalation => "privilege_escalation",
            Self::MassDataAccess => "mass_data_access",
            Self::DataBreachAttempt => "data_breach_attempt",
            Self::SuspiciousIpActivity => "suspicious_ip_activity",
            Self::PasswordResetAbuse => "password_reset_abuse",
            Self::SessionHijacking => "session_hijacking",
        };
        f.write_str(label)
    }
}

/// Coarse four-tier classification of the current security posture.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ThreatLevel {
    Low,
    Moderate,
    High,
    Critical,
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Request-scoped context attached to an event. All fields are optional; the
/// caller fills in whatever the originating code path knows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContext {
    pub user_id: Option<String>,
    pub ip_address: Option<IpAddr>,
    pub country: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub request_id: Option<String>,
    pub company_id: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A single observed security-relevant occurrence. Lives only in the event
/// buffer; the persistent record is owned by the audit-log store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: SecurityEventType,
    pub outcome: EventOutcome,
    pub severity: EventSeverity,
    pub context: EventContext,
}

impl SecurityEvent {
    pub fn new(
        event_type: SecurityEventType,
        outcome: EventOutcome,
        severity: EventSeverity,
        context: EventContext,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            outcome,
            severity,
            context,
        }
    }
}

/// A de-duplicated, actionable alert derived from one or more events.
///
/// Immutable after creation except for the acknowledgment fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityAlert {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub severity: AlertSeverity,
    pub alert_type: AlertType,
    pub title: String,
    pub description: String,
    pub event_type: SecurityEventType,
    pub context: EventContext,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Detector output the alert manager may admit as a stored alert.
#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub description: String,
    pub event_type: SecurityEventType,
    pub context: EventContext,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Which baseline an anomaly verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyKind {
    Geographical,
    Temporal,
}

/// Result of baseline anomaly detection for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub is_anomaly: bool,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f64,
    pub kind: Option<AnomalyKind>,
    pub description: String,
    pub recommended_actions: Vec<String>,
}

impl AnomalyVerdict {
    /// The "nothing unusual" verdict.
    pub fn none() -> Self {
        Self {
            is_anomaly: false,
            confidence: 0.0,
            kind: None,
            description: String::new(),
            recommended_actions: Vec::new(),
        }
    }

    /// Maps confidence to an alert severity using fixed bands.
    pub fn severity(&self) -> AlertSeverity {
        if self.confidence >= 0.9 {
            AlertSeverity::Critical
        } else if self.confidence >= 0.8 {
            AlertSeverity::High
        } else if self.confidence >= 0.6 {
            AlertSeverity::Medium
        } else {
            AlertSeverity::Low
        }
    }
}

/// Half-open is not needed here; both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The trailing `hours` ending now.
    pub fn last_hours(hours: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - chrono::Duration::hours(hours),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Output encodings for alert export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportFormat {
    Json,
    Csv,
}
