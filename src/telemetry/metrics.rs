//! Metric instrument factories for storyq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"storyq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for storyq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("storyq")
}

/// Counter: number of events published.
/// Labels: `event_type`.
pub fn events_published() -> Counter<u64> {
    meter()
        .u64_counter("storyq.events.published")
        .with_description("Number of events published to the queue")
        .build()
}

/// Counter: event status transitions.
/// Labels: `from`, `to`.
pub fn event_transitions() -> Counter<u64> {
    meter()
        .u64_counter("storyq.events.status_transitions")
        .with_description("Number of event status transitions")
        .build()
}

/// Counter: remote subtasks created.
/// Labels: `result` ("ok" | "error").
pub fn subtasks_created() -> Counter<u64> {
    meter()
        .u64_counter("storyq.subtasks.created")
        .with_description("Number of remote subtask creation attempts")
        .build()
}

/// Counter: worker poll cycles.
/// Labels: `result` ("ok" | "error").
pub fn poll_cycles() -> Counter<u64> {
    meter()
        .u64_counter("storyq.worker.poll_cycles")
        .with_description("Number of worker poll cycles")
        .build()
}

/// Histogram: event processing duration in milliseconds.
/// Labels: `event_type`, `status`.
pub fn event_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("storyq.events.duration_ms")
        .with_description("Event processing duration in milliseconds")
        .with_unit("ms")
        .build()
}
