//! End-of-run review figures.

use chrono::Duration;

use crate::model::WorkflowSnapshot;

/// Totals shown when a workflow finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSummary {
    pub crew_name: Option<String>,
    pub duration: Option<Duration>,
    pub tasks: usize,
    pub agents: usize,
    pub tool_calls: usize,
    pub llm_calls: usize,
    pub auxiliary_events: usize,
    pub events: usize,
}

impl WorkflowSummary {
    pub fn of(snapshot: &WorkflowSnapshot) -> Self {
        let duration = snapshot
            .crew
            .as_ref()
            .and_then(|crew| crew.ended_at.map(|end| end - crew.started_at));

        Self {
            crew_name: snapshot.crew.as_ref().map(|crew| crew.name.clone()),
            duration,
            tasks: snapshot.tasks.len(),
            agents: snapshot.agents.len(),
            tool_calls: snapshot.agents.values().map(|a| a.tools.len()).sum(),
            llm_calls: snapshot.agents.values().map(|a| a.llm_calls.len()).sum(),
            auxiliary_events: snapshot.auxiliary.len(),
            events: snapshot.events.len(),
        }
    }

    /// Duration as `"2m 5s"`, `"42s"`, or `"N/A"` when the crew has not
    /// both started and finished.
    pub fn duration_label(&self) -> String {
        match self.duration {
            Some(duration) => format_duration(duration),
            None => "N/A".to_string(),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    let seconds = duration.num_seconds().max(0);
    let minutes = seconds / 60;
    if minutes > 0 {
        format!("{minutes}m {}s", seconds % 60)
    } else {
        format!("{seconds}s")
    }
}

impl std::fmt::Display for WorkflowSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Workflow:   {}",
            self.crew_name.as_deref().unwrap_or("-")
        )?;
        writeln!(f, "Duration:   {}", self.duration_label())?;
        writeln!(f, "Tasks:      {}", self.tasks)?;
        writeln!(f, "Agents:     {}", self.agents)?;
        writeln!(f, "Tools:      {}", self.tool_calls)?;
        writeln!(f, "LLM Calls:  {}", self.llm_calls)?;
        writeln!(f, "Aux Events: {}", self.auxiliary_events)?;
        write!(f, "Events:     {}", self.events)
    }
}
