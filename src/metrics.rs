//! Aggregate security posture: metrics, score, threat level, per-user risk,
//! per-IP assessment.

use crate::audit_store::{AuditRecord, AuditStore};
use crate::errors::SecurityMonitoringError;
use crate::types::{
    AlertType, EventOutcome, EventSeverity, SecurityAlert, SecurityEventType, ThreatLevel,
    TimeRange,
};
use chrono::{Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

/// How many alert types the breakdown keeps.
const TOP_ALERT_TYPES: usize = 5;

/// How many users the risk ranking keeps.
const TOP_RISK_USERS: usize = 10;

/// One user's accumulated risk over the queried range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRiskScore {
    pub user_id: String,
    /// Accumulated risk, clamped to `[0, 100]`.
    pub score: u8,
    pub failed_auth_count: u64,
    pub rate_limited_count: u64,
    pub critical_event_count: u64,
    pub distinct_countries: u64,
}

/// Aggregate posture over a time range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityMetrics {
    pub time_range: TimeRange,
    pub total_events: u64,
    pub critical_events: u64,
    pub active_alerts: u64,
    pub acknowledged_alerts: u64,
    pub events_by_type: HashMap<SecurityEventType, u64>,
    /// Top alert types by count, descending.
    pub top_alert_types: Vec<(AlertType, u64)>,
    pub events_by_country: HashMap<String, u64>,
    /// Event counts per UTC hour of day.
    pub events_by_hour: [u64; 24],
    pub top_user_risk: Vec<UserRiskScore>,
    /// 0–100, 100 is healthiest.
    pub security_score: u8,
    pub threat_level: ThreatLevel,
}

/// Risk assessment for one source IP over the trailing 24 hours.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpThreatAssessment {
    pub ip_address: IpAddr,
    pub threat_level: ThreatLevel,
    pub risk_factors: Vec<String>,
    pub recommendations: Vec<String>,
    pub events_last_day: u64,
}

/// Computes posture aggregates from the historical store plus an alert
/// snapshot.
pub struct MetricsService {
    store: Arc<dyn AuditStore>,
}

impl MetricsService {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Aggregates events in range (optionally scoped to one tenant) together
    /// with the given alert snapshot.
    pub async fn security_metrics(
        &self,
        range: &TimeRange,
        company_id: Option<&str>,
        alerts: &[SecurityAlert],
    ) -> Result<SecurityMetrics, SecurityMonitoringError> {
        let events = self.store.events_in_range(range, company_id).await?;
        debug!(events = events.len(), alerts = alerts.len(), "computing security metrics");

        let total_events = events.len() as u64;
        let critical_events = events
            .iter()
            .filter(|e| e.severity == EventSeverity::Critical)
            .count() as u64;

        let active_alerts = alerts.iter().filter(|a| !a.acknowledged).count() as u64;
        let acknowledged_alerts = alerts.len() as u64 - active_alerts;

        let mut events_by_type: HashMap<SecurityEventType, u64> = HashMap::new();
        let mut events_by_country: HashMap<String, u64> = HashMap::new();
        let mut events_by_hour = [0u64; 24];
        for event in &events {
            *events_by_type.entry(event.event_type).or_insert(0) += 1;
            if let Some(country) = &event.context.country {
                *events_by_country.entry(country.clone()).or_insert(0) += 1;
            }
            events_by_hour[event.timestamp.hour() as usize] += 1;
        }

        let alerts_in_range: Vec<&SecurityAlert> = alerts
            .iter()
            .filter(|a| range.contains(a.timestamp))
            .collect();
        let mut alert_type_counts: HashMap<AlertType, u64> = HashMap::new();
        for alert in &alerts_in_range {
            *alert_type_counts.entry(alert.alert_type).or_insert(0) += 1;
        }
        let high_risk_alerts: u64 = alert_type_counts
            .iter()
            .filter(|(t, _)| t.is_high_risk())
            .map(|(_, n)| *n)
            .sum();
        let mut top_alert_types: Vec<(AlertType, u64)> = alert_type_counts.into_iter().collect();
        top_alert_types.sort_by(|a, b| b.1.cmp(&a.1));
        top_alert_types.truncate(TOP_ALERT_TYPES);

        let security_score =
            security_score(total_events, critical_events, active_alerts, high_risk_alerts);
        let threat_level = threat_level(security_score, active_alerts, critical_events);

        Ok(SecurityMetrics {
            time_range: *range,
            total_events,
            critical_events,
            active_alerts,
            acknowledged_alerts,
            events_by_type,
            top_alert_types,
            events_by_country,
            events_by_hour,
            top_user_risk: user_risk_scores(&events),
            security_score,
            threat_level,
        })
    }

    /// Assesses one IP over the trailing 24 hours.
    pub async fn ip_threat_assessment(
        &self,
        ip: IpAddr,
    ) -> Result<IpThreatAssessment, SecurityMonitoringError> {
        let since = Utc::now() - Duration::hours(24);
        let events = self.store.events_for_ip(ip, since).await?;

        let failed_logins = events
            .iter()
            .filter(|e| {
                e.event_type == SecurityEventType::Authentication
                    && e.outcome == EventOutcome::Failure
            })
            .count();
        let rate_limited = events
            .iter()
            .filter(|e| e.outcome == EventOutcome::RateLimited)
            .count();
        let targeted_accounts: HashSet<&str> = events
            .iter()
            .filter(|e| e.event_type == SecurityEventType::Authentication)
            .filter_map(|e| e.context.user_id.as_deref())
            .collect();

        let mut risk_factors = Vec::new();
        let mut recommendations = Vec::new();
        if failed_logins > 10 {
            risk_factors.push(format!("{failed_logins} failed logins in the last 24 hours"));
            recommendations.push("Consider blocking this IP at the edge".to_string());
        }
        if rate_limited > 5 {
            risk_factors.push(format!(
                "{rate_limited} rate-limit violations in the last 24 hours"
            ));
            recommendations.push("Tighten rate limits for this IP".to_string());
        }
        if targeted_accounts.len() > 5 {
            risk_factors.push(format!(
                "{} distinct accounts targeted",
                targeted_accounts.len()
            ));
            recommendations.push("Check targeted accounts for compromise".to_string());
        }

        let threat_level = match risk_factors.len() {
            0 => ThreatLevel::Low,
            1 => ThreatLevel::Moderate,
            2 => ThreatLevel::High,
            _ => ThreatLevel::Critical,
        };

        if risk_factors.is_empty() {
            risk_factors.push(format!(
                "{} events observed in the last 24 hours",
                events.len()
            ));
            recommendations.push("Continue monitoring".to_string());
        }

        Ok(IpThreatAssessment {
            ip_address: ip,
            threat_level,
            risk_factors,
            recommendations,
            events_last_day: events.len() as u64,
        })
    }
}

/// Composite 0–100 health score; 100 is healthiest.
pub fn security_score(
    total_events: u64,
    critical_events: u64,
    active_alerts: u64,
    high_risk_alerts: u64,
) -> u8 {
    let mut score = 100.0;
    score -= f64::min(30.0, critical_events as f64 * 2.0);
    score -= f64::min(25.0, active_alerts as f64 * 3.0);
    score -= f64::min(20.0, high_risk_alerts as f64 * 5.0);
    if total_events > 1000 {
        score -= f64::min(15.0, (total_events - 1000) as f64 / 100.0);
    }
    score.max(0.0).round() as u8
}

/// Four-tier classification; checks are evaluated most-severe first.
pub fn threat_level(score: u8, active_alerts: u64, critical_events: u64) -> ThreatLevel {
    if score < 50 || active_alerts >= 5 || critical_events >= 3 {
        ThreatLevel::Critical
    } else if score < 70 || active_alerts >= 3 || critical_events >= 2 {
        ThreatLevel::High
    } else if score < 85 || active_alerts >= 1 || critical_events >= 1 {
        ThreatLevel::Moderate
    } else {
        ThreatLevel::Low
    }
}

fn user_risk_scores(events: &[AuditRecord]) -> Vec<UserRiskScore> {
    struct Tally {
        failed_auth: u64,
        rate_limited: u64,
        critical: u64,
        countries: HashSet<String>,
    }

    let mut per_user: HashMap<&str, Tally> = HashMap::new();
    for event in events {
        let Some(user_id) = event.context.user_id.as_deref() else {
            continue;
        };
        let tally = per_user.entry(user_id).or_insert_with(|| Tally {
            failed_auth: 0,
            rate_limited: 0,
            critical: 0,
            countries: HashSet::new(),
        });
        if event.event_type == SecurityEventType::Authentication
            && event.outcome == EventOutcome::Failure
        {
            tally.failed_auth += 1;
        }
        if event.outcome == EventOutcome::RateLimited {
            tally.rate_limited += 1;
        }
        if event.severity == EventSeverity::Critical {
            tally.critical += 1;
        }
        if let Some(country) = &event.context.country {
            tally.countries.insert(country.clone());
        }
    }

    let mut scores: Vec<UserRiskScore> = per_user
        .into_iter()
        .map(|(user_id, tally)| {
            let mut score =
                tally.failed_auth * 10 + tally.rate_limited * 15 + tally.critical * 25;
            if tally.countries.len() > 2 {
                score += 20;
            }
            UserRiskScore {
                user_id: user_id.to_string(),
                score: score.min(100) as u8,
                failed_auth_count: tally.failed_auth,
                rate_limited_count: tally.rate_limited,
                critical_event_count: tally.critical,
                distinct_countries: tally.countries.len() as u64,
            }
        })
        .collect();

    scores.sort_by(|a, b| b.score.cmp(&a.score).then(a.user_id.cmp(&b.user_id)));
    scores.truncate(TOP_RISK_USERS);
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_store::InMemoryAuditStore;
    use crate::types::{AlertSeverity, EventContext};
    use uuid::Uuid;

    fn record(
        event_type: SecurityEventType,
        outcome: EventOutcome,
        severity: EventSeverity,
        user: Option<&str>,
        country: Option<&str>,
    ) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            event_type,
            action: "test".to_string(),
            outcome,
            severity,
            context: EventContext {
                user_id: user.map(String::from),
                country: country.map(String::from),
                ..Default::default()
            },
            error_message: None,
            metadata: HashMap::new(),
        }
    }

    fn alert(alert_type: AlertType, acknowledged: bool) -> SecurityAlert {
        SecurityAlert {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity: AlertSeverity::High,
            alert_type,
            title: "t".to_string(),
            description: "d".to_string(),
            event_type: SecurityEventType::Authentication,
            context: EventContext::default(),
            metadata: HashMap::new(),
            acknowledged,
            acknowledged_by: None,
            acknowledged_at: None,
        }
    }

    #[test]
    fn score_is_clamped_to_valid_range() {
        assert_eq!(security_score(0, 0, 0, 0), 100);
        // Every penalty maxed out.
        assert_eq!(security_score(10_000, 100, 100, 100), 10);
        assert!(security_score(1_000_000, 1000, 1000, 1000) <= 100);
    }

    #[test]
    fn score_penalties_accumulate() {
        // 2 critical events (-4), 1 active alert (-3).
        assert_eq!(security_score(10, 2, 1, 0), 93);
        // Volume penalty only past 1000 events.
        assert_eq!(security_score(1000, 0, 0, 0), 100);
        assert_eq!(security_score(1200, 0, 0, 0), 98);
    }

    #[test]
    fn threat_level_priority_order() {
        assert_eq!(threat_level(100, 0, 0), ThreatLevel::Low);
        assert_eq!(threat_level(84, 0, 0), ThreatLevel::Moderate);
        assert_eq!(threat_level(100, 1, 0), ThreatLevel::Moderate);
        assert_eq!(threat_level(69, 0, 0), ThreatLevel::High);
        assert_eq!(threat_level(100, 3, 0), ThreatLevel::High);
        assert_eq!(threat_level(100, 0, 2), ThreatLevel::High);
        assert_eq!(threat_level(49, 0, 0), ThreatLevel::Critical);
        assert_eq!(threat_level(100, 5, 0), ThreatLevel::Critical);
        assert_eq!(threat_level(100, 0, 3), ThreatLevel::Critical);
    }

    #[test]
    fn threat_level_is_monotonic_in_score() {
        // All else equal, a lower score never yields a lower threat level.
        for high in 0..=100u8 {
            for low in 0..high {
                assert!(threat_level(low, 0, 0) >= threat_level(high, 0, 0));
            }
        }
    }

    #[tokio::test]
    async fn empty_store_yields_perfect_posture() {
        let service = MetricsService::new(Arc::new(InMemoryAuditStore::new()));
        let metrics = service
            .security_metrics(&TimeRange::last_hours(24), None, &[])
            .await
            .unwrap();

        assert_eq!(metrics.security_score, 100);
        assert_eq!(metrics.threat_level, ThreatLevel::Low);
        assert_eq!(metrics.total_events, 0);
        assert!(metrics.top_alert_types.is_empty());
        assert!(metrics.top_user_risk.is_empty());
    }

    #[tokio::test]
    async fn critical_events_and_alerts_force_critical_level() {
        let store = Arc::new(InMemoryAuditStore::new());
        for _ in 0..3 {
            store
                .append(record(
                    SecurityEventType::Authentication,
                    EventOutcome::Failure,
                    EventSeverity::Critical,
                    None,
                    None,
                ))
                .await
                .unwrap();
        }
        let alerts: Vec<SecurityAlert> = (0..5)
            .map(|_| alert(AlertType::RateLimitBreach, false))
            .collect();

        let service = MetricsService::new(store);
        let metrics = service
            .security_metrics(&TimeRange::last_hours(1), None, &alerts)
            .await
            .unwrap();
        assert_eq!(metrics.threat_level, ThreatLevel::Critical);
        assert_eq!(metrics.critical_events, 3);
        assert_eq!(metrics.active_alerts, 5);
    }

    #[tokio::test]
    async fn breakdowns_count_types_countries_and_hours() {
        let store = Arc::new(InMemoryAuditStore::new());
        store
            .append(record(
                SecurityEventType::Authentication,
                EventOutcome::Success,
                EventSeverity::Info,
                Some("alice"),
                Some("DE"),
            ))
            .await
            .unwrap();
        store
            .append(record(
                SecurityEventType::RateLimiting,
                EventOutcome::RateLimited,
                EventSeverity::Low,
                Some("alice"),
                Some("DE"),
            ))
            .await
            .unwrap();

        let service = MetricsService::new(store);
        let metrics = service
            .security_metrics(&TimeRange::last_hours(1), None, &[])
            .await
            .unwrap();

        assert_eq!(
            metrics.events_by_type[&SecurityEventType::Authentication],
            1
        );
        assert_eq!(metrics.events_by_country["DE"], 2);
        assert_eq!(metrics.events_by_hour.iter().sum::<u64>(), 2);
        let hour = Utc::now().hour() as usize;
        assert_eq!(metrics.events_by_hour[hour], 2);
    }

    #[tokio::test]
    async fn alert_breakdown_keeps_top_five() {
        let store = Arc::new(InMemoryAuditStore::new());
        let mut alerts = Vec::new();
        let types = [
            AlertType::BruteForceAttack,
            AlertType::RateLimitBreach,
            AlertType::CsrfAttack,
            AlertType::GeolocationAnomaly,
            AlertType::UnusualAdminActivity,
            AlertType::MassDataAccess,
            AlertType::SuspiciousIpActivity,
        ];
        for (i, t) in types.iter().enumerate() {
            for _ in 0..=i {
                alerts.push(alert(*t, true));
            }
        }

        let service = MetricsService::new(store);
        let metrics = service
            .security_metrics(&TimeRange::last_hours(1), None, &alerts)
            .await
            .unwrap();

        assert_eq!(metrics.top_alert_types.len(), 5);
        // Sorted descending by count.
        assert!(metrics
            .top_alert_types
            .windows(2)
            .all(|w| w[0].1 >= w[1].1));
        assert_eq!(
            metrics.top_alert_types[0],
            (AlertType::SuspiciousIpActivity, 7)
        );
    }

    #[test]
    fn user_risk_is_bounded_sorted_and_truncated() {
        let mut events = Vec::new();
        // Fifteen users with increasing failure counts.
        for user in 0..15 {
            for _ in 0..user {
                events.push(record(
                    SecurityEventType::Authentication,
                    EventOutcome::Failure,
                    EventSeverity::Medium,
                    Some(&format!("user-{user:02}")),
                    None,
                ));
            }
        }

        let scores = user_risk_scores(&events);
        assert!(scores.len() <= 10);
        assert!(scores.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(scores.iter().all(|s| s.score <= 100));
        assert_eq!(scores[0].user_id, "user-14");
    }

    #[test]
    fn multi_country_activity_adds_risk() {
        let mut events = Vec::new();
        for country in ["DE", "FR", "BR"] {
            events.push(record(
                SecurityEventType::Authentication,
                EventOutcome::Failure,
                EventSeverity::Medium,
                Some("roamer"),
                Some(country),
            ));
        }
        let scores = user_risk_scores(&events);
        // 3 failures (30) + country spread bonus (20).
        assert_eq!(scores[0].score, 50);
        assert_eq!(scores[0].distinct_countries, 3);
    }

    #[tokio::test]
    async fn ip_with_no_history_is_low_threat() {
        let service = MetricsService::new(Arc::new(InMemoryAuditStore::new()));
        let assessment = service
            .ip_threat_assessment("203.0.113.9".parse().unwrap())
            .await
            .unwrap();

        assert_eq!(assessment.threat_level, ThreatLevel::Low);
        assert_eq!(assessment.risk_factors.len(), 1);
        assert_eq!(assessment.recommendations, vec!["Continue monitoring"]);
    }

    #[tokio::test]
    async fn hostile_ip_accumulates_risk_factors() {
        let store = Arc::new(InMemoryAuditStore::new());
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        for i in 0..12 {
            let mut r = record(
                SecurityEventType::Authentication,
                EventOutcome::Failure,
                EventSeverity::Medium,
                Some(&format!("victim-{i}")),
                None,
            );
            r.context.ip_address = Some(ip);
            store.append(r).await.unwrap();
        }
        for _ in 0..6 {
            let mut r = record(
                SecurityEventType::RateLimiting,
                EventOutcome::RateLimited,
                EventSeverity::Low,
                None,
                None,
            );
            r.context.ip_address = Some(ip);
            store.append(r).await.unwrap();
        }

        let service = MetricsService::new(store);
        let assessment = service.ip_threat_assessment(ip).await.unwrap();

        // Failed logins, rate limiting, and targeted-account spread all fire.
        assert_eq!(assessment.risk_factors.len(), 3);
        assert_eq!(assessment.threat_level, ThreatLevel::Critical);
        assert_eq!(assessment.events_last_day, 18);
    }
}
