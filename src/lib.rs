//! # flowwatch
//!
//! Live monitor for agent workflows. Consumes crew / agent / task / tool /
//! model-call lifecycle events from a server-sent event stream and folds them
//! into a nested snapshot of what is running and what has finished.
//!
//! Provides the event model, the pure reducer, a session actor that owns the
//! push-channel lifecycle, an SSE transport, and OpenTelemetry observability.

pub mod config;
pub mod error;
pub mod event;
pub mod model;
pub mod reducer;
pub mod session;
pub mod summary;
pub mod telemetry;
pub mod transport;

pub use event::{Action, Event, EventKind, IdGenerator};
pub use model::WorkflowSnapshot;
pub use reducer::replay;
pub use session::{Session, SessionHandle};
