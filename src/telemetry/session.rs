//! Session span helpers.
//!
//! One span per monitoring session; connection changes are recorded as
//! events scoped to it.

use tracing::Span;
use uuid::Uuid;

/// Start the span for a monitoring session.
///
/// `session.url` is declared empty and filled by [`record_subscription`].
pub fn start_session_span(session_id: &Uuid) -> Span {
    tracing::info_span!(
        "flowwatch.session",
        "session.id" = %session_id,
        "session.url" = tracing::field::Empty,
    )
}

/// Record the endpoint of the current subscription on the session span.
pub fn record_subscription(span: &Span, url: &str) {
    span.record("session.url", url);
}

/// Record a connection status change on the session span.
pub fn record_connection_change(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "connection_change");
    });
}
