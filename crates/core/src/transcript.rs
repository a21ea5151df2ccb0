//! Turn and Transcript domain types.
//!
//! These are the core value objects that flow through the agent loop:
//! a task produces a transcript of turns (user/system/model/tool-result)
//! which is replayed to the model on every iteration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a turn in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user (or the initial task context block)
    User,
    /// The model
    Assistant,
    /// System instructions (preamble, operating rules)
    System,
    /// Tool execution result
    Tool,
}

/// A single turn in a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID
    pub id: String,

    /// Who produced this turn
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tool calls requested by the model (if any)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<TurnToolCall>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a new user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// Create a new system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a tool result turn.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut turn = Self::with_role(Role::Tool, content);
        turn.tool_call_id = Some(tool_call_id.into());
        turn
    }

    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: Utc::now(),
        }
    }
}

/// A tool call embedded in an assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnToolCall {
    /// Unique ID for this tool call
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Arguments as a JSON string
    pub arguments: String,
}

/// The ordered sequence of turns for one run, keyed by conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    /// The conversation this transcript belongs to
    pub conversation_id: String,

    /// Ordered turns
    pub turns: Vec<Turn>,

    /// When this transcript was created
    pub created_at: DateTime<Utc>,

    /// When the last turn was added
    pub updated_at: DateTime<Utc>,
}

impl Transcript {
    /// Create a new empty transcript for a conversation.
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a turn to the transcript.
    pub fn push(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    /// The last assistant turn's content, if any.
    pub fn last_assistant_content(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.content.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_turn() {
        let turn = Turn::user("Book me a table for two");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.content, "Book me a table for two");
        assert!(turn.tool_calls.is_empty());
    }

    #[test]
    fn tool_result_carries_call_id() {
        let turn = Turn::tool_result("call_7", "{\"success\":true}");
        assert_eq!(turn.role, Role::Tool);
        assert_eq!(turn.tool_call_id.as_deref(), Some("call_7"));
    }

    #[test]
    fn transcript_tracks_updates() {
        let mut transcript = Transcript::new("conv_1");
        let created = transcript.created_at;

        transcript.push(Turn::user("First turn"));
        assert_eq!(transcript.turns.len(), 1);
        assert!(transcript.updated_at >= created);
    }

    #[test]
    fn last_assistant_content_skips_tool_turns() {
        let mut transcript = Transcript::new("conv_1");
        transcript.push(Turn::user("task"));
        transcript.push(Turn::assistant("calling a tool"));
        transcript.push(Turn::tool_result("call_1", "result"));

        assert_eq!(transcript.last_assistant_content(), Some("calling a tool"));
    }

    #[test]
    fn turn_serialization_roundtrip() {
        let turn = Turn::user("Test turn");
        let json = serde_json::to_string(&turn).unwrap();
        let deserialized: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.content, "Test turn");
        assert_eq!(deserialized.role, Role::User);
    }
}
