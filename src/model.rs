//! Derived workflow state.
//!
//! The snapshot is what the rendering layer reads: a crew, the agents and
//! tasks seen so far, their tool and model calls, the auxiliary events, and
//! the full audit log the rest is derived from.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::event::{AuxKind, Event};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Push-channel state as seen by the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connected => "connected",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle of a crew, agent or task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Idle,
    Running,
    Complete,
}

impl Status {
    pub fn is_running(self) -> bool {
        self == Status::Running
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Idle => "idle",
            Status::Running => "running",
            Status::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

/// Lifecycle of a bracketed call (tool, model call, auxiliary step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Running,
    Complete,
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CallStatus::Running => "running",
            CallStatus::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewState {
    pub name: String,
    pub status: Status,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub role: String,
    pub goal: Option<String>,
    pub status: Status,
    pub tools: Vec<ToolCall>,
    pub llm_calls: Vec<LlmCall>,
    /// Sequence number of the start event. Tool and model calls go to the
    /// running agent with the highest value.
    pub started_seq: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub name: String,
    pub description: Option<String>,
    pub status: Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Id of the start event.
    pub id: String,
    pub name: String,
    pub status: CallStatus,
    pub output: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCall {
    /// Id of the start event.
    pub id: String,
    pub model: String,
    pub status: CallStatus,
    pub response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuxiliaryEntry {
    /// Id of the start event.
    pub id: String,
    pub kind: AuxKind,
    pub status: CallStatus,
    pub content: Option<String>,
    /// Only set for reasoning steps.
    pub agent_role: Option<String>,
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The aggregate view of one monitoring session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub connection: ConnectionStatus,
    /// Why the last subscription stopped, if it failed or was closed by the
    /// server. Cleared on connect and reset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Set once the crew reports completion.
    pub is_complete: bool,
    pub crew: Option<CrewState>,
    pub agents: IndexMap<String, AgentState>,
    pub tasks: IndexMap<String, TaskState>,
    pub auxiliary: Vec<AuxiliaryEntry>,
    /// Every event received, in arrival order.
    pub events: Vec<Event>,
}

impl WorkflowSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionStatus::Connected
    }

    /// True once the run has finished and a review can be shown.
    pub fn is_review_ready(&self) -> bool {
        self.is_complete
            && self
                .crew
                .as_ref()
                .is_some_and(|crew| crew.status == Status::Complete)
    }

    /// The agent tool and model calls are attributed to: the most recently
    /// started agent that is still running.
    pub fn active_agent(&self) -> Option<&AgentState> {
        self.agents
            .values()
            .filter(|agent| agent.status.is_running())
            .max_by_key(|agent| agent.started_seq)
    }

    pub(crate) fn active_agent_mut(&mut self) -> Option<&mut AgentState> {
        self.agents
            .values_mut()
            .filter(|agent| agent.status.is_running())
            .max_by_key(|agent| agent.started_seq)
    }
}
