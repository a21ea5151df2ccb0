//! Status update domain types.
//!
//! Status updates are the rendezvous mechanism between independently
//! running agents: an append-only log of timestamped progress notes keyed
//! by conversation. There is no update or delete — corrections are new
//! entries, and duplicates are harmless extra log lines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An immutable status record written by one agent for one conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Unique status update ID
    pub id: String,

    /// The agent that wrote this update
    pub agent_id: String,

    /// The agent's type (e.g., "orchestrator", "whatsapp", "booking")
    pub agent_type: String,

    /// The conversation this update belongs to
    pub conversation_id: String,

    /// Free-text progress note
    pub update: String,

    /// Server-assigned timestamp
    pub timestamp: DateTime<Utc>,
}

/// Optional filters for reading a conversation's status log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusFilter {
    /// Only updates from agents of this type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,

    /// Only updates from this specific agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl StatusFilter {
    /// Whether the given update passes this filter.
    pub fn matches(&self, update: &StatusUpdate) -> bool {
        if let Some(agent_type) = &self.agent_type
            && update.agent_type != *agent_type
        {
            return false;
        }
        if let Some(agent_id) = &self.agent_id
            && update.agent_id != *agent_id
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(agent_id: &str, agent_type: &str) -> StatusUpdate {
        StatusUpdate {
            id: "s1".into(),
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            conversation_id: "conv_1".into(),
            update: "working".into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = StatusFilter::default();
        assert!(filter.matches(&update("a", "orchestrator")));
        assert!(filter.matches(&update("b", "whatsapp")));
    }

    #[test]
    fn agent_type_filter() {
        let filter = StatusFilter {
            agent_type: Some("booking".into()),
            agent_id: None,
        };
        assert!(filter.matches(&update("a", "booking")));
        assert!(!filter.matches(&update("a", "orchestrator")));
    }

    #[test]
    fn agent_id_filter() {
        let filter = StatusFilter {
            agent_type: None,
            agent_id: Some("agent_42".into()),
        };
        assert!(filter.matches(&update("agent_42", "whatsapp")));
        assert!(!filter.matches(&update("agent_7", "whatsapp")));
    }
}
