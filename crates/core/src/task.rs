//! Task and run-result domain types.
//!
//! A Task is one unit of work routed through the agent loop: a free-text
//! instruction plus the identifying context (user, conversation) and the
//! loop's budgets. The loop returns a RunResult carrying the terminal
//! status, the full transcript, and the execution log.

use crate::transcript::Transcript;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One user-issued instruction routed through the agent loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// The free-text instruction
    pub instruction: String,

    /// The owning user — the authoritative value injected into contextual
    /// tool parameters
    pub user_id: String,

    /// The conversation — the authoritative value injected into contextual
    /// tool parameters
    pub conversation_id: String,

    /// Hard cap on model iterations before the run fails
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Default wait duration in seconds for the loop's wait state
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
}

fn default_max_iterations() -> u32 {
    10
}

fn default_wait_secs() -> u64 {
    30
}

impl Task {
    pub fn new(
        instruction: impl Into<String>,
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            instruction: instruction.into(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            max_iterations: default_max_iterations(),
            wait_secs: default_wait_secs(),
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_wait_secs(mut self, secs: u64) -> Self {
        self.wait_secs = secs;
        self
    }
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// The result of one agent loop run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// How the run ended
    pub status: RunStatus,

    /// How many model iterations were executed
    pub iterations: u32,

    /// The full transcript
    pub transcript: Transcript,

    /// The full execution log (the primary observability artifact)
    pub execution_log: Vec<ExecutionEntry>,

    /// Human-readable summary of the terminal state
    pub final_message: String,
}

/// One entry in the execution log, independent from the model transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionEntry {
    /// Which iteration produced this entry (0 = before the first model call)
    pub iteration: u32,

    /// When it happened
    pub timestamp: DateTime<Utc>,

    /// What kind of action this was
    pub action: ActionKind,

    /// Free-text outcome description
    pub outcome: String,
}

impl ExecutionEntry {
    pub fn new(iteration: u32, action: ActionKind, outcome: impl Into<String>) -> Self {
        Self {
            iteration,
            timestamp: Utc::now(),
            action,
            outcome: outcome.into(),
        }
    }
}

/// The kind of action recorded in an execution log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// The model was queried for the next step
    ModelCall,

    /// A tool was dispatched
    ToolCall {
        name: String,
        args: serde_json::Value,
    },

    /// The loop suspended waiting for external information
    Wait { duration_secs: u64 },

    /// The completion policy was consulted
    PolicyDecision,

    /// An error was recovered or recorded
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_defaults() {
        let task = Task::new("find a plumber", "user_1", "conv_1");
        assert_eq!(task.max_iterations, 10);
        assert_eq!(task.wait_secs, 30);
    }

    #[test]
    fn task_builder_overrides() {
        let task = Task::new("call the venue", "user_1", "conv_1")
            .with_max_iterations(3)
            .with_wait_secs(5);
        assert_eq!(task.max_iterations, 3);
        assert_eq!(task.wait_secs, 5);
    }

    #[test]
    fn execution_entry_serialization() {
        let entry = ExecutionEntry::new(
            2,
            ActionKind::ToolCall {
                name: "web_search".into(),
                args: serde_json::json!({"query": "plumber near Camden"}),
            },
            "3 results",
        );
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("tool_call"));
        assert!(json.contains("Camden"));
    }

    #[test]
    fn run_status_serialization() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::Failed).unwrap(),
            "\"failed\""
        );
    }
}
