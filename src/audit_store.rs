//! Historical audit-log store interface.
//!
//! The persistent store is owned by the audit-log service; this crate only
//! queries it for detection baselines and metrics aggregation, and appends
//! traceability records for alert creation and acknowledgment. Backends
//! implement [`AuditStore`]; [`InMemoryAuditStore`] serves tests and
//! single-node deployments.

use crate::errors::AuditStoreError;
use crate::types::{EventContext, EventOutcome, EventSeverity, SecurityEventType, TimeRange};
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use tokio::sync::RwLock;

/// One event as persisted by the audit-log service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub event_type: SecurityEventType,
    /// Free-form action name, e.g. `"login"` or `"user_role_changed"`.
    pub action: String,
    pub outcome: EventOutcome,
    pub severity: EventSeverity,
    pub context: EventContext,
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Filter for counting events in the historical store. Empty `event_types`
/// matches every category.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub event_types: Vec<SecurityEventType>,
    pub outcome: Option<EventOutcome>,
    pub ip_address: Option<IpAddr>,
    pub user_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl EventQuery {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&record.event_type) {
            return false;
        }
        if let Some(outcome) = self.outcome {
            if record.outcome != outcome {
                return false;
            }
        }
        if let Some(ip) = self.ip_address {
            if record.context.ip_address != Some(ip) {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if record.context.user_id.as_deref() != Some(user_id.as_str()) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if record.timestamp < since {
                return false;
            }
        }
        true
    }
}

/// Storage backend for historical security events.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append one event record.
    async fn append(&self, record: AuditRecord) -> Result<(), AuditStoreError>;

    /// Count events matching the filter.
    async fn count_events(&self, query: &EventQuery) -> Result<u64, AuditStoreError>;

    /// All events in the range, optionally scoped to one tenant.
    async fn events_in_range(
        &self,
        range: &TimeRange,
        company_id: Option<&str>,
    ) -> Result<Vec<AuditRecord>, AuditStoreError>;

    /// All events observed from one IP since the given instant.
    async fn events_for_ip(
        &self,
        ip: IpAddr,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, AuditStoreError>;

    /// Distinct countries a user has produced events of this type from,
    /// within `[since, until)`. The exclusive upper bound lets detectors
    /// baseline against history without seeing the event under evaluation.
    async fn countries_for_user(
        &self,
        user_id: &str,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<HashSet<String>, AuditStoreError>;

    /// Average per-day count of events of this type falling in the given
    /// hour-of-day (UTC), over the trailing `days`.
    async fn hourly_average(
        &self,
        event_type: SecurityEventType,
        hour_of_day: u32,
        days: u32,
    ) -> Result<f64, AuditStoreError>;
}

/// In-memory [`AuditStore`] backend.
#[derive(Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditStoreError> {
        self.records.write().await.push(record);
        Ok(())
    }

    async fn count_events(&self, query: &EventQuery) -> Result<u64, AuditStoreError> {
        let records = self.records.read().await;
        Ok(records.iter().filter(|r| query.matches(r)).count() as u64)
    }

    async fn events_in_range(
        &self,
        range: &TimeRange,
        company_id: Option<&str>,
    ) -> Result<Vec<AuditRecord>, AuditStoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| range.contains(r.timestamp))
            .filter(|r| match company_id {
                Some(id) => r.context.company_id.as_deref() == Some(id),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn events_for_ip(
        &self,
        ip: IpAddr,
        since: DateTime<Utc>,
    ) -> Result<Vec<AuditRecord>, AuditStoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.context.ip_address == Some(ip) && r.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn countries_for_user(
        &self,
        user_id: &str,
        event_type: SecurityEventType,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<HashSet<String>, AuditStoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| {
                r.event_type == event_type
                    && r.timestamp >= since
                    && r.timestamp < until
                    && r.context.user_id.as_deref() == Some(user_id)
            })
            .filter_map(|r| r.context.country.clone())
            .collect())
    }

    async fn hourly_average(
        &self,
        event_type: SecurityEventType,
        hour_of_day: u32,
        days: u32,
    ) -> Result<f64, AuditStoreError> {
        if days == 0 {
            return Ok(0.0);
        }
        let since = Utc::now() - chrono::Duration::days(i64::from(days));
        let records = self.records.read().await;
        let count = records
            .iter()
            .filter(|r| {
                r.event_type == event_type
                    && r.timestamp >= since
                    && r.timestamp.hour() == hour_of_day
            })
            .count();
        Ok(count as f64 / f64::from(days))
    }
}
