//! Threshold rules and baseline anomaly detection.
//!
//! All rules are evaluated independently per event; a single event can
//! trigger several threats. Historical-store lookups run under a bounded
//! timeout, and a timed-out or failed lookup makes the rule report nothing:
//! enrichment fails open, recording the raw event never depends on it.

use crate::audit_store::{AuditStore, EventQuery};
use crate::config::ThresholdConfig;
use crate::event_buffer::EventBuffer;
use crate::types::{
    AlertCandidate, AlertSeverity, AlertType, AnomalyKind, AnomalyVerdict, EventOutcome,
    SecurityEvent, SecurityEventType,
};
use chrono::{Duration, Timelike, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Upper bound on any single historical-store lookup.
const STORE_QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(2);

/// How far back the geographic baseline reaches.
const BASELINE_DAYS: i64 = 7;

/// Live traffic must exceed this multiple of the hourly baseline to count as
/// a temporal anomaly.
const TEMPORAL_SPIKE_FACTOR: f64 = 3.0;

/// Baselines averaging fewer events per hour than this are too sparse to
/// judge against; temporal detection skips them.
const MIN_HOURLY_BASELINE: f64 = 1.0;

/// Stateless (per call) rule evaluator over the event stream.
pub struct ThreatDetector {
    store: Arc<dyn AuditStore>,
    query_timeout: std::time::Duration,
}

impl ThreatDetector {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            query_timeout: STORE_QUERY_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_timeout(store: Arc<dyn AuditStore>, query_timeout: std::time::Duration) -> Self {
        Self {
            store,
            query_timeout,
        }
    }

    /// Runs every threshold rule against the event. Rules that do not apply
    /// to the event shape are skipped; rules whose store lookup fails are
    /// skipped with a warning.
    pub async fn detect_immediate_threats(
        &self,
        event: &SecurityEvent,
        thresholds: &ThresholdConfig,
    ) -> Vec<AlertCandidate> {
        let mut threats = Vec::new();

        self.check_brute_force(event, thresholds, &mut threats).await;
        self.check_admin_activity(event, thresholds, &mut threats).await;
        self.check_rate_limit_breach(event, thresholds, &mut threats).await;
        self.check_csp_violations(event, thresholds, &mut threats).await;
        self.check_mass_data_access(event, thresholds, &mut threats).await;

        threats
    }

    async fn check_brute_force(
        &self,
        event: &SecurityEvent,
        thresholds: &ThresholdConfig,
        threats: &mut Vec<AlertCandidate>,
    ) {
        if event.event_type != SecurityEventType::Authentication
            || event.outcome != EventOutcome::Failure
        {
            return;
        }
        let Some(ip) = event.context.ip_address else {
            return;
        };

        let query = EventQuery {
            event_types: vec![SecurityEventType::Authentication],
            outcome: Some(EventOutcome::Failure),
            ip_address: Some(ip),
            since: Some(Utc::now() - Duration::minutes(5)),
            ..Default::default()
        };
        let Some(failures) = self.counted(&query, "brute_force").await else {
            return;
        };

        if failures >= u64::from(thresholds.failed_logins_per_minute) {
            threats.push(candidate(
                event,
                AlertType::BruteForceAttack,
                AlertSeverity::High,
                "Possible brute force attack".to_string(),
                format!("{failures} failed login attempts from {ip} in the last 5 minutes"),
                json_counts(failures, thresholds.failed_logins_per_minute, 5),
            ));
        }
    }

    async fn check_admin_activity(
        &self,
        event: &SecurityEvent,
        thresholds: &ThresholdConfig,
        threats: &mut Vec<AlertCandidate>,
    ) {
        if !event.event_type.is_admin_category() {
            return;
        }
        let Some(user_id) = event.context.user_id.clone() else {
            return;
        };

        let query = EventQuery {
            event_types: vec![
                SecurityEventType::PlatformAdmin,
                SecurityEventType::UserManagement,
            ],
            user_id: Some(user_id.clone()),
            since: Some(Utc::now() - Duration::hours(1)),
            ..Default::default()
        };
        let Some(actions) = self.counted(&query, "admin_activity").await else {
            return;
        };

        if actions >= u64::from(thresholds.admin_actions_per_hour) {
            threats.push(candidate(
                event,
                AlertType::UnusualAdminActivity,
                AlertSeverity::Medium,
                "Unusual admin activity".to_string(),
                format!("User {user_id} performed {actions} admin actions in the last hour"),
                json_counts(actions, thresholds.admin_actions_per_hour, 60),
            ));
        }
    }

    async fn check_rate_limit_breach(
        &self,
        event: &SecurityEvent,
        thresholds: &ThresholdConfig,
        threats: &mut Vec<AlertCandidate>,
    ) {
        if event.outcome != EventOutcome::RateLimited {
            return;
        }
        let Some(ip) = event.context.ip_address else {
            return;
        };

        let query = EventQuery {
            outcome: Some(EventOutcome::RateLimited),
            ip_address: Some(ip),
            since: Some(Utc::now() - Duration::minutes(1)),
            ..Default::default()
        };
        let Some(hits) = self.counted(&query, "rate_limit_breach").await else {
            return;
        };

        if hits >= u64::from(thresholds.rate_limit_violations_per_minute) {
            threats.push(candidate(
                event,
                AlertType::RateLimitBreach,
                AlertSeverity::Medium,
                "Rate limit breach".to_string(),
                format!("{hits} rate-limited requests from {ip} in the last minute"),
                json_counts(hits, thresholds.rate_limit_violations_per_minute, 1),
            ));
        }
    }

    async fn check_csp_violations(
        &self,
        event: &SecurityEvent,
        thresholds: &ThresholdConfig,
        threats: &mut Vec<AlertCandidate>,
    ) {
        if event.event_type != SecurityEventType::SecurityHeaders
            || event.outcome != EventOutcome::Blocked
        {
            return;
        }
        let Some(ip) = event.context.ip_address else {
            return;
        };

        let query = EventQuery {
            event_types: vec![SecurityEventType::SecurityHeaders],
            outcome: Some(EventOutcome::Blocked),
            ip_address: Some(ip),
            since: Some(Utc::now() - Duration::minutes(1)),
            ..Default::default()
        };
        let Some(violations) = self.counted(&query, "csp_violations").await else {
            return;
        };

        if violations >= u64::from(thresholds.csp_violations_per_minute) {
            threats.push(candidate(
                event,
                AlertType::CspViolationSpike,
                AlertSeverity::Medium,
                "CSP violation spike".to_string(),
                format!("{violations} blocked CSP reports from {ip} in the last minute"),
                json_counts(violations, thresholds.csp_violations_per_minute, 1),
            ));
        }
    }

    async fn check_mass_data_access(
        &self,
        event: &SecurityEvent,
        thresholds: &ThresholdConfig,
        threats: &mut Vec<AlertCandidate>,
    ) {
        if event.event_type != SecurityEventType::DataPrivacy {
            return;
        }
        let Some(user_id) = event.context.user_id.clone() else {
            return;
        };

        let query = EventQuery {
            event_types: vec![SecurityEventType::DataPrivacy],
            user_id: Some(user_id.clone()),
            since: Some(Utc::now() - Duration::hours(1)),
            ..Default::default()
        };
        let Some(accesses) = self.counted(&query, "mass_data_access").await else {
            return;
        };

        if accesses >= u64::from(thresholds.mass_data_access_threshold) {
            threats.push(candidate(
                event,
                AlertType::MassDataAccess,
                AlertSeverity::High,
                "Mass data access".to_string(),
                format!("User {user_id} touched {accesses} data-privacy records in the last hour"),
                json_counts(accesses, thresholds.mass_data_access_threshold, 60),
            ));
        }
    }

    /// Baseline anomaly detection: geographic first, then temporal; the
    /// first confident verdict wins.
    pub async fn detect_anomalies(
        &self,
        event: &SecurityEvent,
        buffer: &EventBuffer,
    ) -> AnomalyVerdict {
        if let Some(verdict) = self.geographic_anomaly(event).await {
            return verdict;
        }
        if let Some(verdict) = self.temporal_anomaly(event, buffer).await {
            return verdict;
        }
        AnomalyVerdict::none()
    }

    async fn geographic_anomaly(&self, event: &SecurityEvent) -> Option<AnomalyVerdict> {
        let user_id = event.context.user_id.as_deref()?;
        let country = event.context.country.as_deref()?;

        // Baseline strictly before the event under evaluation, so an event
        // already written to the store does not vouch for itself.
        let since = event.timestamp - Duration::days(BASELINE_DAYS);
        let lookup = self
            .store
            .countries_for_user(user_id, event.event_type, since, event.timestamp);
        let known = match tokio::time::timeout(self.query_timeout, lookup).await {
            Ok(Ok(countries)) => countries,
            Ok(Err(e)) => {
                warn!(rule = "geographic_anomaly", error = %e, "baseline lookup failed");
                return None;
            }
            Err(_) => {
                warn!(rule = "geographic_anomaly", "baseline lookup timed out");
                return None;
            }
        };

        if known.is_empty() || known.contains(country) {
            return None;
        }

        debug!(user_id, country, "sign-in from a country outside the user's baseline");
        Some(AnomalyVerdict {
            is_anomaly: true,
            confidence: 0.8,
            kind: Some(AnomalyKind::Geographical),
            description: format!(
                "User {user_id} produced a {} event from {country}, outside their {}-day baseline",
                event.event_type, BASELINE_DAYS
            ),
            recommended_actions: vec![
                "Verify the sign-in with the account owner".to_string(),
                "Require step-up authentication for this session".to_string(),
                "Review the account's recent activity".to_string(),
            ],
        })
    }

    async fn temporal_anomaly(
        &self,
        event: &SecurityEvent,
        buffer: &EventBuffer,
    ) -> Option<AnomalyVerdict> {
        let hour = Utc::now().hour();
        let lookup = self
            .store
            .hourly_average(event.event_type, hour, BASELINE_DAYS as u32);
        let average = match tokio::time::timeout(self.query_timeout, lookup).await {
            Ok(Ok(avg)) => avg,
            Ok(Err(e)) => {
                warn!(rule = "temporal_anomaly", error = %e, "baseline lookup failed");
                return None;
            }
            Err(_) => {
                warn!(rule = "temporal_anomaly", "baseline lookup timed out");
                return None;
            }
        };

        if average < MIN_HOURLY_BASELINE {
            return None;
        }

        let event_type = event.event_type;
        let live = buffer
            .count_matching(Duration::hours(1), |e| e.event_type == event_type)
            .await as f64;

        if live <= average * TEMPORAL_SPIKE_FACTOR {
            return None;
        }

        Some(AnomalyVerdict {
            is_anomaly: true,
            confidence: 0.7,
            kind: Some(AnomalyKind::Temporal),
            description: format!(
                "{live:.0} {event_type} events in the last hour against a weekly average of {average:.1} for this hour of day",
            ),
            recommended_actions: vec![
                "Compare current traffic against the weekly baseline".to_string(),
                "Check for scheduled jobs or batch imports".to_string(),
                "Review the source IPs driving the spike".to_string(),
            ],
        })
    }

    /// Counts via the historical store; `None` means the rule should skip.
    async fn counted(&self, query: &EventQuery, rule: &'static str) -> Option<u64> {
        match tokio::time::timeout(self.query_timeout, self.store.count_events(query)).await {
            Ok(Ok(count)) => Some(count),
            Ok(Err(e)) => {
                warn!(rule, error = %e, "historical count failed, skipping rule");
                None
            }
            Err(_) => {
                warn!(rule, "historical count timed out, skipping rule");
                None
            }
        }
    }
}

fn candidate(
    event: &SecurityEvent,
    alert_type: AlertType,
    severity: AlertSeverity,
    title: String,
    description: String,
    metadata: HashMap<String, serde_json::Value>,
) -> AlertCandidate {
    AlertCandidate {
        alert_type,
        severity,
        title,
        description,
        event_type: event.event_type,
        context: event.context.clone(),
        metadata,
    }
}

fn json_counts(observed: u64, threshold: u32, window_minutes: u32) -> HashMap<String, serde_json::Value> {
    let mut metadata = HashMap::new();
    metadata.insert("observed".to_string(), json!(observed));
    metadata.insert("threshold".to_string(), json!(threshold));
    metadata.insert("window_minutes".to_string(), json!(window_minutes));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_store::{AuditRecord, InMemoryAuditStore};
    use crate::errors::AuditStoreError;
    use crate::types::{EventContext, EventSeverity, TimeRange};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::net::IpAddr;

    fn auth_failure(ip: &str) -> SecurityEvent {
        SecurityEvent::new(
            SecurityEventType::Authentication,
            EventOutcome::Failure,
            EventSeverity::Medium,
            EventContext {
                ip_address: Some(ip.parse().unwrap()),
                user_id: Some("alice".to_string()),
                ..Default::default()
            },
        )
    }

    fn record_from(event: &SecurityEvent) -> AuditRecord {
        AuditRecord {
            timestamp: event.timestamp,
            event_type: event.event_type,
            action: "login".to_string(),
            outcome: event.outcome,
            severity: event.severity,
            context: event.context.clone(),
            error_message: None,
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn brute_force_fires_at_threshold() {
        let store = Arc::new(InMemoryAuditStore::new());
        let detector = ThreatDetector::new(store.clone());
        let thresholds = ThresholdConfig::default();

        let event = auth_failure("1.2.3.4");
        for _ in 0..5 {
            store.append(record_from(&event)).await.unwrap();
        }

        let threats = detector.detect_immediate_threats(&event, &thresholds).await;
        assert_eq!(threats.len(), 1);
        assert_eq!(threats[0].alert_type, AlertType::BruteForceAttack);
        assert_eq!(threats[0].severity, AlertSeverity::High);
        assert_eq!(
            threats[0].context.ip_address,
            Some("1.2.3.4".parse::<IpAddr>().unwrap())
        );
    }

    #[tokio::test]
    async fn brute_force_stays_quiet_below_threshold() {
        let store = Arc::new(InMemoryAuditStore::new());
        let detector = ThreatDetector::new(store.clone());

        let event = auth_failure("1.2.3.4");
        for _ in 0..4 {
            store.append(record_from(&event)).await.unwrap();
        }

        let threats = detector
            .detect_immediate_threats(&event, &ThresholdConfig::default())
            .await;
        assert!(threats.is_empty());
    }

    #[tokio::test]
    async fn rules_skip_events_without_an_ip() {
        let store = Arc::new(InMemoryAuditStore::new());
        let detector = ThreatDetector::new(store);

        let mut event = auth_failure("1.2.3.4");
        event.context.ip_address = None;

        let threats = detector
            .detect_immediate_threats(&event, &ThresholdConfig::default())
            .await;
        assert!(threats.is_empty());
    }

    #[tokio::test]
    async fn rate_limited_logins_trip_the_breach_rule_not_brute_force() {
        let store = Arc::new(InMemoryAuditStore::new());
        let detector = ThreatDetector::new(store.clone());

        let mut event = auth_failure("9.9.9.9");
        event.outcome = EventOutcome::RateLimited;
        for _ in 0..10 {
            store.append(record_from(&event)).await.unwrap();
        }
        let threats = detector
            .detect_immediate_threats(&event, &ThresholdConfig::default())
            .await;
        assert_eq!(threats.len(), 1);
        assert_eq!(threats[0].alert_type, AlertType::RateLimitBreach);
    }

    #[tokio::test]
    async fn admin_burst_raises_unusual_activity() {
        let store = Arc::new(InMemoryAuditStore::new());
        let detector = ThreatDetector::new(store.clone());

        let event = SecurityEvent::new(
            SecurityEventType::PlatformAdmin,
            EventOutcome::Success,
            EventSeverity::Low,
            EventContext {
                user_id: Some("root-admin".to_string()),
                ..Default::default()
            },
        );
        for _ in 0..50 {
            store.append(record_from(&event)).await.unwrap();
        }

        let threats = detector
            .detect_immediate_threats(&event, &ThresholdConfig::default())
            .await;
        assert_eq!(threats.len(), 1);
        assert_eq!(threats[0].alert_type, AlertType::UnusualAdminActivity);
        assert_eq!(threats[0].severity, AlertSeverity::Medium);
    }

    #[tokio::test]
    async fn geographic_anomaly_flags_new_country() {
        let store = Arc::new(InMemoryAuditStore::new());
        let detector = ThreatDetector::new(store.clone());
        let buffer = EventBuffer::new();

        let mut baseline = auth_failure("1.2.3.4");
        baseline.outcome = EventOutcome::Success;
        baseline.context.country = Some("DE".to_string());
        baseline.timestamp = Utc::now() - Duration::days(1);
        store.append(record_from(&baseline)).await.unwrap();

        let mut event = auth_failure("1.2.3.4");
        event.outcome = EventOutcome::Success;
        event.context.country = Some("BR".to_string());

        let verdict = detector.detect_anomalies(&event, &buffer).await;
        assert!(verdict.is_anomaly);
        assert_eq!(verdict.kind, Some(AnomalyKind::Geographical));
        assert!((verdict.confidence - 0.8).abs() < f64::EPSILON);
        assert!(!verdict.recommended_actions.is_empty());
    }

    #[tokio::test]
    async fn known_country_is_not_anomalous() {
        let store = Arc::new(InMemoryAuditStore::new());
        let detector = ThreatDetector::new(store.clone());
        let buffer = EventBuffer::new();

        let mut baseline = auth_failure("1.2.3.4");
        baseline.context.country = Some("DE".to_string());
        baseline.timestamp = Utc::now() - Duration::days(1);
        store.append(record_from(&baseline)).await.unwrap();

        let mut event = auth_failure("1.2.3.4");
        event.context.country = Some("DE".to_string());

        let verdict = detector.detect_anomalies(&event, &buffer).await;
        assert!(!verdict.is_anomaly);
        assert_eq!(verdict.confidence, 0.0);
    }

    #[tokio::test]
    async fn sparse_baseline_skips_temporal_detection() {
        let store = Arc::new(InMemoryAuditStore::new());
        let detector = ThreatDetector::new(store.clone());
        let buffer = EventBuffer::new();

        // One historical event: weekly average for this hour is well below
        // one per hour, so a burst of live events must not trip the rule.
        let event = SecurityEvent::new(
            SecurityEventType::Csrf,
            EventOutcome::Blocked,
            EventSeverity::Medium,
            EventContext::default(),
        );
        store.append(record_from(&event)).await.unwrap();
        for _ in 0..20 {
            buffer.add_event(event.clone()).await;
        }

        let verdict = detector.detect_anomalies(&event, &buffer).await;
        assert!(!verdict.is_anomaly);
    }

    #[tokio::test]
    async fn temporal_spike_over_dense_baseline_is_flagged() {
        let store = Arc::new(InMemoryAuditStore::new());
        let detector = ThreatDetector::new(store.clone());
        let buffer = EventBuffer::new();

        let event = SecurityEvent::new(
            SecurityEventType::Authentication,
            EventOutcome::Success,
            EventSeverity::Info,
            EventContext::default(),
        );
        // Seven events in the current hour-of-day across the trailing week
        // gives an average of one per day; 0-day-old records all land in
        // today's bucket, which is fine for the average computation.
        for _ in 0..7 {
            store.append(record_from(&event)).await.unwrap();
        }
        for _ in 0..10 {
            buffer.add_event(event.clone()).await;
        }

        let verdict = detector.detect_anomalies(&event, &buffer).await;
        assert!(verdict.is_anomaly);
        assert_eq!(verdict.kind, Some(AnomalyKind::Temporal));
        assert!((verdict.confidence - 0.7).abs() < f64::EPSILON);
    }

    /// Store double whose every call fails.
    struct FailingStore;

    #[async_trait]
    impl AuditStore for FailingStore {
        async fn append(&self, _record: AuditRecord) -> Result<(), AuditStoreError> {
            Err(AuditStoreError::Unavailable("down".to_string()))
        }
        async fn count_events(&self, _query: &EventQuery) -> Result<u64, AuditStoreError> {
            Err(AuditStoreError::Query("down".to_string()))
        }
        async fn events_in_range(
            &self,
            _range: &TimeRange,
            _company_id: Option<&str>,
        ) -> Result<Vec<AuditRecord>, AuditStoreError> {
            Err(AuditStoreError::Query("down".to_string()))
        }
        async fn events_for_ip(
            &self,
            _ip: IpAddr,
            _since: chrono::DateTime<Utc>,
        ) -> Result<Vec<AuditRecord>, AuditStoreError> {
            Err(AuditStoreError::Query("down".to_string()))
        }
        async fn countries_for_user(
            &self,
            _user_id: &str,
            _event_type: SecurityEventType,
            _since: chrono::DateTime<Utc>,
            _until: chrono::DateTime<Utc>,
        ) -> Result<HashSet<String>, AuditStoreError> {
            Err(AuditStoreError::Query("down".to_string()))
        }
        async fn hourly_average(
            &self,
            _event_type: SecurityEventType,
            _hour_of_day: u32,
            _days: u32,
        ) -> Result<f64, AuditStoreError> {
            Err(AuditStoreError::Query("down".to_string()))
        }
    }

    #[tokio::test]
    async fn store_failures_fail_open() {
        let detector = ThreatDetector::new(Arc::new(FailingStore));
        let buffer = EventBuffer::new();

        let mut event = auth_failure("1.2.3.4");
        event.context.country = Some("DE".to_string());

        let threats = detector
            .detect_immediate_threats(&event, &ThresholdConfig::default())
            .await;
        assert!(threats.is_empty());

        let verdict = detector.detect_anomalies(&event, &buffer).await;
        assert!(!verdict.is_anomaly);
    }

    /// Store double that hangs until well past any reasonable timeout.
    struct HangingStore;

    #[async_trait]
    impl AuditStore for HangingStore {
        async fn append(&self, _record: AuditRecord) -> Result<(), AuditStoreError> {
            Ok(())
        }
        async fn count_events(&self, _query: &EventQuery) -> Result<u64, AuditStoreError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(0)
        }
        async fn events_in_range(
            &self,
            _range: &TimeRange,
            _company_id: Option<&str>,
        ) -> Result<Vec<AuditRecord>, AuditStoreError> {
            Ok(Vec::new())
        }
        async fn events_for_ip(
            &self,
            _ip: IpAddr,
            _since: chrono::DateTime<Utc>,
        ) -> Result<Vec<AuditRecord>, AuditStoreError> {
            Ok(Vec::new())
        }
        async fn countries_for_user(
            &self,
            _user_id: &str,
            _event_type: SecurityEventType,
            _since: chrono::DateTime<Utc>,
            _until: chrono::DateTime<Utc>,
        ) -> Result<HashSet<String>, AuditStoreError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(HashSet::new())
        }
        async fn hourly_average(
            &self,
            _event_type: SecurityEventType,
            _hour_of_day: u32,
            _days: u32,
        ) -> Result<f64, AuditStoreError> {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
            Ok(0.0)
        }
    }

    #[tokio::test]
    async fn slow_store_lookups_time_out_and_fail_open() {
        let detector = ThreatDetector::with_timeout(
            Arc::new(HangingStore),
            std::time::Duration::from_millis(10),
        );
        let buffer = EventBuffer::new();
        let mut event = auth_failure("1.2.3.4");
        event.context.country = Some("DE".to_string());

        let threats = detector
            .detect_immediate_threats(&event, &ThresholdConfig::default())
            .await;
        assert!(threats.is_empty());

        let verdict = detector.detect_anomalies(&event, &buffer).await;
        assert!(!verdict.is_anomaly);
    }
}
