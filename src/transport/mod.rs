//! The push channel the session subscribes to.
//!
//! A [`Transport`] opens a subscription and yields one string per message.
//! The session never looks below this seam; [`sse::SseTransport`] is the
//! production implementation.

pub mod sse;

pub use sse::{SseDecoder, SseTransport};

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::Result;

/// Messages from one open subscription. An `Err` item ends the subscription.
pub type MessageStream = BoxStream<'static, Result<String>>;

/// Opens subscriptions to an event endpoint.
pub trait Transport: Send + Sync + 'static {
    /// Resolve once the channel is open, or fail if it cannot be opened.
    fn open(&self, url: &str) -> BoxFuture<'static, Result<MessageStream>>;
}
