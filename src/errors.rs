//! Error types for the monitoring engine.
//!
//! The ingest path (`process_security_event`) never surfaces these to the
//! caller; detection and notification failures are logged and swallowed.
//! The query API returns them.

use thiserror::Error;

/// Failures from the historical audit-log store.
#[derive(Debug, Error)]
pub enum AuditStoreError {
    #[error("audit store query failed: {0}")]
    Query(String),
    #[error("audit store write failed: {0}")]
    Write(String),
    #[error("audit store unavailable: {0}")]
    Unavailable(String),
}

/// Failures from a notification channel. Never retried in-process.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("network error: {0}")]
    Network(String),
    #[error("channel rejected alert with status {0}")]
    Rejected(u16),
    #[error("channel misconfigured: {0}")]
    Config(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors surfaced by the query API of [`crate::SecurityMonitor`].
#[derive(Debug, Error)]
pub enum SecurityMonitoringError {
    #[error("audit store error")]
    Store(#[from] AuditStoreError),
    #[error("export failed: {0}")]
    Export(String),
    #[error("serialization error")]
    Serialization(#[from] serde_json::Error),
}
