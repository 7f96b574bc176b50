//! Short-horizon in-memory event buffer.
//!
//! Append-only and time-bounded: events older than the retention horizon are
//! dropped on [`EventBuffer::cleanup`], and a hard cap bounds memory if
//! cleanup falls behind a traffic burst.

use crate::types::SecurityEvent;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;

/// Hard cap on buffered events.
const MAX_BUFFERED_EVENTS: usize = 10_000;

/// Time-bounded buffer of recently observed events.
pub struct EventBuffer {
    events: RwLock<Vec<SecurityEvent>>,
    retention: Duration,
}

impl EventBuffer {
    /// Buffer with the standard one-hour retention horizon.
    pub fn new() -> Self {
        Self::with_retention(Duration::hours(1))
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            retention,
        }
    }

    /// Appends unconditionally; no validation beyond the type shape.
    pub async fn add_event(&self, event: SecurityEvent) {
        let mut events = self.events.write().await;
        events.push(event);
        if events.len() > MAX_BUFFERED_EVENTS {
            let excess = events.len() - MAX_BUFFERED_EVENTS;
            events.drain(..excess);
        }
    }

    /// Events newer than `now - window`, in insertion order. `None` uses the
    /// retention horizon.
    pub async fn recent_events(&self, window: Option<Duration>) -> Vec<SecurityEvent> {
        let cutoff = Utc::now() - window.unwrap_or(self.retention);
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.timestamp > cutoff)
            .cloned()
            .collect()
    }

    /// Counts buffered events newer than `window` ago that satisfy the
    /// predicate.
    pub async fn count_matching<F>(&self, window: Duration, predicate: F) -> usize
    where
        F: Fn(&SecurityEvent) -> bool,
    {
        let cutoff = Utc::now() - window;
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.timestamp > cutoff && predicate(e))
            .count()
    }

    /// Drops events older than the retention horizon.
    pub async fn cleanup(&self) {
        let cutoff = Utc::now() - self.retention;
        let mut events = self.events.write().await;
        events.retain(|e| e.timestamp > cutoff);
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventContext, EventOutcome, EventSeverity, SecurityEventType};

    fn event() -> SecurityEvent {
        SecurityEvent::new(
            SecurityEventType::Authentication,
            EventOutcome::Success,
            EventSeverity::Info,
            EventContext::default(),
        )
    }

    #[tokio::test]
    async fn add_and_retrieve_preserves_insertion_order() {
        let buffer = EventBuffer::new();
        for _ in 0..3 {
            buffer.add_event(event()).await;
        }
        let recent = buffer.recent_events(None).await;
        assert_eq!(recent.len(), 3);
        assert!(recent.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn cleanup_drops_events_past_the_horizon() {
        let buffer = EventBuffer::with_retention(Duration::minutes(5));
        let mut old = event();
        old.timestamp = Utc::now() - Duration::minutes(10);
        buffer.add_event(old).await;
        buffer.add_event(event()).await;

        buffer.cleanup().await;
        assert_eq!(buffer.len().await, 1);
    }

    #[tokio::test]
    async fn windowed_retrieval_excludes_older_events() {
        let buffer = EventBuffer::new();
        let mut old = event();
        old.timestamp = Utc::now() - Duration::minutes(30);
        buffer.add_event(old).await;
        buffer.add_event(event()).await;

        let last_minute = buffer.recent_events(Some(Duration::minutes(1))).await;
        assert_eq!(last_minute.len(), 1);
        // The default window still sees both.
        assert_eq!(buffer.recent_events(None).await.len(), 2);
    }

    #[tokio::test]
    async fn count_matching_applies_window_and_predicate() {
        let buffer = EventBuffer::new();
        buffer.add_event(event()).await;
        let mut failure = event();
        failure.outcome = EventOutcome::Failure;
        buffer.add_event(failure).await;

        let failures = buffer
            .count_matching(Duration::minutes(1), |e| {
                e.outcome == EventOutcome::Failure
            })
            .await;
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn buffer_is_capped() {
        let buffer = EventBuffer::new();
        for _ in 0..(MAX_BUFFERED_EVENTS + 50) {
            buffer.add_event(event()).await;
        }
        assert_eq!(buffer.len().await, MAX_BUFFERED_EVENTS);
    }
}
