//! Metric instrument factories for flowwatch.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"flowwatch"` meter.

use opentelemetry::metrics::{Counter, Meter};

/// Returns the shared meter for flowwatch instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("flowwatch")
}

/// Counter: events appended to the audit log.
/// Labels: `type` (wire type, or "unrecognized").
pub fn events_received() -> Counter<u64> {
    meter()
        .u64_counter("flowwatch.events.received")
        .with_description("Number of events appended to the audit log")
        .build()
}

/// Counter: channel messages dropped because they were not JSON.
pub fn payloads_dropped() -> Counter<u64> {
    meter()
        .u64_counter("flowwatch.payloads.dropped")
        .with_description("Number of channel messages that failed to parse")
        .build()
}

/// Counter: connection status changes.
/// Labels: `to` ("connected" | "disconnected").
pub fn connection_transitions() -> Counter<u64> {
    meter()
        .u64_counter("flowwatch.connection.transitions")
        .with_description("Number of connection status changes")
        .build()
}

/// Counter: subscriptions opened with `connect`.
pub fn subscriptions_opened() -> Counter<u64> {
    meter()
        .u64_counter("flowwatch.subscriptions.opened")
        .with_description("Number of push-channel subscriptions requested")
        .build()
}
