//! Event processing span helpers.

use crate::model::EventId;
use tracing::Span;

/// Start a span covering one event's trip through the processor.
///
/// The `event.status` field is declared empty and is filled in by
/// [`record_status_transition`].
pub fn start_event_span(event_type: &str, event_id: EventId) -> Span {
    tracing::info_span!(
        "event.process",
        "event.type" = event_type,
        "event.id" = event_id.0,
        "event.status" = tracing::field::Empty,
    )
}

/// Record a status transition on the span and emit an `info` event in it.
pub fn record_status_transition(span: &Span, from: &str, to: &str) {
    span.record("event.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}
