//! Workflow lifecycle events as received from the producer.
//!
//! The producer sends flat JSON objects tagged by `type` and `action`.
//! Payloads are decoded into [`EventKind`] at the ingestion boundary; the
//! raw object is kept alongside so the audit log stays verbatim even when
//! the shape is not recognized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Event kinds
// ---------------------------------------------------------------------------

/// Whether an event opens or closes a bracketed activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Start,
    Complete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Start => "start",
            Action::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

/// A decoded event payload. One variant per `type` the producer emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Crew {
        action: Action,
        /// Usually absent on completion.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        crew_name: Option<String>,
    },
    Agent {
        action: Action,
        agent_role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_goal: Option<String>,
    },
    Task {
        action: Action,
        task_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_desc: Option<String>,
    },
    Tool {
        action: Action,
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_output: Option<String>,
    },
    Llm {
        action: Action,
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<String>,
    },
    Memory {
        action: Action,
    },
    MemorySave {
        action: Action,
    },
    Knowledge {
        action: Action,
    },
    Reasoning {
        action: Action,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
}

impl EventKind {
    /// Decode a raw payload. Returns `None` when the object does not match
    /// any known shape (unknown `type`, unknown `action`, missing field).
    pub fn decode(payload: &serde_json::Value) -> Option<Self> {
        Self::deserialize(payload).ok()
    }

    pub fn action(&self) -> Action {
        match self {
            EventKind::Crew { action, .. }
            | EventKind::Agent { action, .. }
            | EventKind::Task { action, .. }
            | EventKind::Tool { action, .. }
            | EventKind::Llm { action, .. }
            | EventKind::Memory { action }
            | EventKind::MemorySave { action }
            | EventKind::Knowledge { action }
            | EventKind::Reasoning { action, .. } => *action,
        }
    }

    /// The wire name of the `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            EventKind::Crew { .. } => "crew",
            EventKind::Agent { .. } => "agent",
            EventKind::Task { .. } => "task",
            EventKind::Tool { .. } => "tool",
            EventKind::Llm { .. } => "llm",
            EventKind::Memory { .. } => "memory",
            EventKind::MemorySave { .. } => "memory_save",
            EventKind::Knowledge { .. } => "knowledge",
            EventKind::Reasoning { .. } => "reasoning",
        }
    }
}

/// The auxiliary kinds, tracked as a flat list rather than per agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuxKind {
    Memory,
    MemorySave,
    Knowledge,
    Reasoning,
}

impl std::fmt::Display for AuxKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuxKind::Memory => "memory",
            AuxKind::MemorySave => "memory_save",
            AuxKind::Knowledge => "knowledge",
            AuxKind::Reasoning => "reasoning",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Audit log record
// ---------------------------------------------------------------------------

/// One entry of the audit log. Never mutated after it is stamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Session-unique id, `evt-{seq}-{millis}`.
    pub id: String,
    /// 1-based arrival counter. Restarts after a session reset.
    pub seq: u64,
    /// Arrival time. Never earlier than the previous event's.
    pub timestamp: DateTime<Utc>,
    /// The object exactly as received.
    pub payload: serde_json::Value,
    /// Decoded shape, `None` if unrecognized.
    pub kind: Option<EventKind>,
}

impl Event {
    pub fn is_recognized(&self) -> bool {
        self.kind.is_some()
    }
}

/// Parse one channel message as JSON.
pub fn parse_payload(text: &str) -> Result<serde_json::Value> {
    Ok(serde_json::from_str(text)?)
}

// ---------------------------------------------------------------------------
// Id generation
// ---------------------------------------------------------------------------

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send>;

/// Assigns ids and arrival timestamps. One per monitoring session.
pub struct IdGenerator {
    counter: u64,
    last: Option<DateTime<Utc>>,
    clock: Clock,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    /// Use a custom time source (tests).
    pub fn with_clock(clock: impl Fn() -> DateTime<Utc> + Send + 'static) -> Self {
        Self {
            counter: 0,
            last: None,
            clock: Box::new(clock),
        }
    }

    /// Number of ids handed out since creation or the last reset.
    pub fn issued(&self) -> u64 {
        self.counter
    }

    pub fn reset(&mut self) {
        self.counter = 0;
        self.last = None;
    }

    /// Stamp a payload into an audit log entry.
    pub fn stamp(&mut self, payload: serde_json::Value) -> Event {
        self.counter += 1;

        // Wall clocks can step backwards; arrival order must not.
        let now = (self.clock)();
        let timestamp = match self.last {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last = Some(timestamp);

        let kind = EventKind::decode(&payload);
        Event {
            id: format!("evt-{}-{}", self.counter, timestamp.timestamp_millis()),
            seq: self.counter,
            timestamp,
            payload,
            kind,
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator")
            .field("counter", &self.counter)
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}
