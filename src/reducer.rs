//! The fold from audit log to snapshot.
//!
//! [`WorkflowSnapshot::record`] appends an event to the log and applies it.
//! Applying is total: unrecognized shapes and orphan completions leave the
//! derived state as it was. Connection status and the last subscription
//! error are owned by the session and never touched here, so [`replay`] of a
//! session's log reproduces its derived state exactly.

use tracing::debug;

use crate::event::{Action, AuxKind, Event, EventKind};
use crate::model::*;

impl WorkflowSnapshot {
    /// Append `event` to the audit log and fold it into the derived state.
    pub fn record(&mut self, event: Event) {
        self.apply(&event);
        self.events.push(event);
    }

    /// Fold one event into the derived state without logging it.
    pub fn apply(&mut self, event: &Event) {
        let Some(kind) = &event.kind else {
            debug!(id = %event.id, "unrecognized payload kept in audit log only");
            return;
        };

        match kind {
            EventKind::Crew { action, crew_name } => self.apply_crew(event, *action, crew_name),
            EventKind::Agent {
                action,
                agent_role,
                agent_goal,
            } => self.apply_agent(event, *action, agent_role, agent_goal),
            EventKind::Task {
                action,
                task_name,
                task_desc,
            } => self.apply_task(*action, task_name, task_desc),
            EventKind::Tool {
                action,
                tool_name,
                tool_output,
            } => self.apply_tool(event, *action, tool_name, tool_output),
            EventKind::Llm {
                action,
                model,
                response,
            } => self.apply_llm(event, *action, model, response),
            EventKind::Memory { action } => {
                self.apply_aux(event, *action, AuxKind::Memory, None, None)
            }
            EventKind::MemorySave { action } => {
                self.apply_aux(event, *action, AuxKind::MemorySave, None, None)
            }
            EventKind::Knowledge { action } => {
                self.apply_aux(event, *action, AuxKind::Knowledge, None, None)
            }
            EventKind::Reasoning {
                action,
                agent_role,
                reasoning,
            } => self.apply_aux(
                event,
                *action,
                AuxKind::Reasoning,
                agent_role.as_deref(),
                reasoning.as_deref(),
            ),
        }
    }

    fn apply_crew(&mut self, event: &Event, action: Action, crew_name: &Option<String>) {
        match action {
            Action::Start => {
                self.crew = Some(CrewState {
                    name: crew_name.clone().unwrap_or_default(),
                    status: Status::Running,
                    started_at: event.timestamp,
                    ended_at: None,
                });
            }
            Action::Complete => {
                if let Some(crew) = self.crew.as_mut() {
                    crew.status = Status::Complete;
                    crew.ended_at = Some(event.timestamp);
                }
                // Completion counts even when the start was never seen.
                self.is_complete = true;
            }
        }
    }

    fn apply_agent(
        &mut self,
        event: &Event,
        action: Action,
        role: &str,
        goal: &Option<String>,
    ) {
        match action {
            Action::Start => {
                self.agents.insert(
                    role.to_string(),
                    AgentState {
                        role: role.to_string(),
                        goal: goal.clone(),
                        status: Status::Running,
                        tools: Vec::new(),
                        llm_calls: Vec::new(),
                        started_seq: event.seq,
                    },
                );
            }
            Action::Complete => {
                if let Some(agent) = self.agents.get_mut(role) {
                    agent.status = Status::Complete;
                }
            }
        }
    }

    fn apply_task(&mut self, action: Action, name: &str, description: &Option<String>) {
        match action {
            Action::Start => {
                self.tasks.insert(
                    name.to_string(),
                    TaskState {
                        name: name.to_string(),
                        description: description.clone(),
                        status: Status::Running,
                    },
                );
            }
            Action::Complete => {
                if let Some(task) = self.tasks.get_mut(name) {
                    task.status = Status::Complete;
                }
            }
        }
    }

    fn apply_tool(&mut self, event: &Event, action: Action, name: &str, output: &Option<String>) {
        let Some(agent) = self.active_agent_mut() else {
            debug!(id = %event.id, tool = name, "no running agent, tool event dropped");
            return;
        };

        match action {
            Action::Start => agent.tools.push(ToolCall {
                id: event.id.clone(),
                name: name.to_string(),
                status: CallStatus::Running,
                output: None,
            }),
            Action::Complete => {
                if let Some(tool) = agent
                    .tools
                    .iter_mut()
                    .find(|t| t.name == name && t.status == CallStatus::Running)
                {
                    tool.status = CallStatus::Complete;
                    tool.output = output.clone();
                }
            }
        }
    }

    fn apply_llm(&mut self, event: &Event, action: Action, model: &str, response: &Option<String>) {
        let Some(agent) = self.active_agent_mut() else {
            debug!(id = %event.id, model, "no running agent, llm event dropped");
            return;
        };

        match action {
            Action::Start => agent.llm_calls.push(LlmCall {
                id: event.id.clone(),
                model: model.to_string(),
                status: CallStatus::Running,
                response: None,
            }),
            Action::Complete => {
                if let Some(call) = agent
                    .llm_calls
                    .iter_mut()
                    .find(|c| c.model == model && c.status == CallStatus::Running)
                {
                    call.status = CallStatus::Complete;
                    call.response = response.clone();
                }
            }
        }
    }

    fn apply_aux(
        &mut self,
        event: &Event,
        action: Action,
        kind: AuxKind,
        agent_role: Option<&str>,
        reasoning: Option<&str>,
    ) {
        match action {
            Action::Start => self.auxiliary.push(AuxiliaryEntry {
                id: event.id.clone(),
                kind,
                status: CallStatus::Running,
                content: None,
                agent_role: agent_role.map(str::to_string),
            }),
            Action::Complete => {
                if let Some(entry) = self
                    .auxiliary
                    .iter_mut()
                    .find(|e| e.kind == kind && e.status == CallStatus::Running)
                {
                    entry.status = CallStatus::Complete;
                    entry.content = reasoning.map(str::to_string);
                }
            }
        }
    }
}

/// Rebuild a snapshot from an audit log.
pub fn replay<'a>(events: impl IntoIterator<Item = &'a Event>) -> WorkflowSnapshot {
    events
        .into_iter()
        .fold(WorkflowSnapshot::new(), |mut snapshot, event| {
            snapshot.record(event.clone());
            snapshot
        })
}
