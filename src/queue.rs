//! Event queue service: publish events and move them through their lifecycle.
//!
//! The four status operations here are the only code paths that write an
//! event's status. Everything else in the crate goes through this type rather
//! than the [`EventStore`] directly; the one exception is intake, which
//! inserts a story and its first event in a single storage write.

use crate::db::EventStore;
use crate::error::Result;
use crate::model::{Event, EventId, EventKind, EventStatus};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct EventQueue {
    store: Arc<dyn EventStore>,
}

impl EventQueue {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Insert a new `pending` event. Storage failures are propagated.
    pub async fn publish(&self, event_type: &str, payload: &serde_json::Value) -> Result<EventId> {
        let event = self.store.insert_event(event_type, payload).await?;
        record_published(&event);
        Ok(event.id)
    }

    /// Publish a typed event.
    pub async fn publish_kind(&self, kind: &EventKind) -> Result<EventId> {
        self.publish(kind.event_type(), &kind.payload()?).await
    }

    /// All pending events in creation order. Does not claim them.
    pub async fn fetch_pending(&self) -> Result<Vec<Event>> {
        self.store.pending_events().await
    }

    /// Move a pending event to `processing`.
    ///
    /// Returns `true` if this call claimed the event. Repeating the call, or
    /// calling it for an id that does not exist, is a no-op returning `false`.
    pub async fn mark_processing(&self, id: EventId) -> Result<bool> {
        let claimed = self.store.claim_event(id).await?;
        if claimed {
            record_transition(EventStatus::Pending, EventStatus::Processing);
            debug!(event_id = %id, "event marked processing");
        } else {
            debug!(event_id = %id, "event not claimable, skipping");
        }
        Ok(claimed)
    }

    /// `processing -> completed` with a result payload. A second call on a
    /// terminal event is rejected with `InvalidTransition` and leaves the
    /// stored outcome untouched.
    pub async fn mark_completed(&self, id: EventId, result: &serde_json::Value) -> Result<Event> {
        let event = self.store.complete_event(id, result).await?;
        record_transition(EventStatus::Processing, EventStatus::Completed);
        info!(event_id = %id, "event completed");
        Ok(event)
    }

    /// `processing -> failed` with an error message. Same terminal rules as
    /// [`mark_completed`](Self::mark_completed).
    pub async fn mark_failed(&self, id: EventId, error: &str) -> Result<Event> {
        let event = self.store.fail_event(id, error).await?;
        record_transition(EventStatus::Processing, EventStatus::Failed);
        error!(event_id = %id, %error, "event failed");
        Ok(event)
    }

    /// Fail every event left in `processing` by a worker that never finished
    /// it, e.g. one aborted at shutdown. Only sound while no other worker is
    /// running. Returns how many events were failed.
    pub async fn fail_interrupted(&self, error: &str) -> Result<usize> {
        let stranded = self
            .store
            .list_events(Some(EventStatus::Processing), i64::MAX)
            .await?;
        for event in &stranded {
            warn!(event_id = %event.id, event_type = %event.event_type, "failing interrupted event");
            self.mark_failed(event.id, error).await?;
        }
        Ok(stranded.len())
    }

    pub async fn get(&self, id: EventId) -> Result<Option<Event>> {
        self.store.get_event(id).await
    }

    pub async fn list(&self, status: Option<EventStatus>, limit: i64) -> Result<Vec<Event>> {
        self.store.list_events(status, limit).await
    }
}

/// Metrics and log line for an event inserted by any write path.
pub(crate) fn record_published(event: &Event) {
    metrics::events_published().add(
        1,
        &[KeyValue::new("event_type", event.event_type.clone())],
    );
    info!(event_id = %event.id, event_type = %event.event_type, "published event");
}

fn record_transition(from: EventStatus, to: EventStatus) {
    metrics::event_transitions().add(
        1,
        &[
            KeyValue::new("from", from.as_str()),
            KeyValue::new("to", to.as_str()),
        ],
    );
}
