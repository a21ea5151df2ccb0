//! Status and memory tools — the loop's window into the shared store.
//!
//! These wrap the store clients so the model can read and write the same
//! status log and memory store the sub-agents use.

use crate::{ORCHESTRATOR_AGENT_ID, ORCHESTRATOR_AGENT_TYPE};
use async_trait::async_trait;
use maestro_core::error::ToolError;
use maestro_core::memory::MemoryQuery;
use maestro_core::status::StatusFilter;
use maestro_core::tool::{Tool, ToolOutcome};
use maestro_store::{MemoryStore, StatusStore};
use std::sync::Arc;

/// Writes a progress note into the conversation's status log.
pub struct WriteStatusTool {
    status: Arc<dyn StatusStore>,
}

impl WriteStatusTool {
    pub fn new(status: Arc<dyn StatusStore>) -> Self {
        Self { status }
    }
}

#[async_trait]
impl Tool for WriteStatusTool {
    fn name(&self) -> &str {
        "write_status"
    }

    fn description(&self) -> &str {
        "Write a status update for the current conversation so other agents and the user can \
         follow progress."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "update": {
                    "type": "string",
                    "description": "The status update message"
                },
                "conversation_id": {
                    "type": "string",
                    "description": "Handled automatically; do not supply"
                }
            },
            "required": ["update"]
        })
    }

    fn contextual_params(&self) -> &[&str] {
        &["conversation_id"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let update = arguments["update"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'update' argument".into()))?;
        let conversation_id = arguments["conversation_id"].as_str().unwrap_or_default();

        match self
            .status
            .write(
                ORCHESTRATOR_AGENT_ID,
                ORCHESTRATOR_AGENT_TYPE,
                conversation_id,
                update,
            )
            .await
        {
            Ok(id) => Ok(ToolOutcome::ok(format!("Status update written ({id})"))),
            Err(e) => Ok(ToolOutcome::err(format!("Status write failed: {e}"))),
        }
    }
}

/// Reads the conversation's status log, ascending by timestamp.
pub struct ReadStatusTool {
    status: Arc<dyn StatusStore>,
}

impl ReadStatusTool {
    pub fn new(status: Arc<dyn StatusStore>) -> Self {
        Self { status }
    }
}

#[async_trait]
impl Tool for ReadStatusTool {
    fn name(&self) -> &str {
        "read_status"
    }

    fn description(&self) -> &str {
        "Read all status updates for the current conversation, oldest first. Use this to check \
         on sub-agents (phone calls, WhatsApp conversations, bookings) you started earlier."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent_type": {
                    "type": "string",
                    "description": "Optionally filter to one agent type (e.g. 'whatsapp', 'booking')"
                },
                "conversation_id": {
                    "type": "string",
                    "description": "Handled automatically; do not supply"
                }
            }
        })
    }

    fn contextual_params(&self) -> &[&str] {
        &["conversation_id"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let conversation_id = arguments["conversation_id"].as_str().unwrap_or_default();
        let filter = StatusFilter {
            agent_type: arguments["agent_type"].as_str().map(String::from),
            agent_id: None,
        };

        match self.status.read(conversation_id, &filter).await {
            Ok(updates) => {
                let data = serde_json::to_value(&updates).unwrap_or_default();
                let summary = if updates.is_empty() {
                    "No status updates yet.".to_string()
                } else {
                    updates
                        .iter()
                        .map(|u| format!("[{}] {} ({}): {}", u.timestamp, u.agent_id, u.agent_type, u.update))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                Ok(ToolOutcome::ok(summary).with_data(data))
            }
            Err(e) => Ok(ToolOutcome::err(format!("Status read failed: {e}"))),
        }
    }
}

/// Stores a memory for the current user, optionally under a contact scope.
pub struct AddMemoryTool {
    memory: Arc<dyn MemoryStore>,
}

impl AddMemoryTool {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for AddMemoryTool {
    fn name(&self) -> &str {
        "add_memory"
    }

    fn description(&self) -> &str {
        "Store a memory for the current user. Pass contact_id to file it under one of the \
         user's contacts instead of the user themselves."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "memory": {
                    "type": "string",
                    "description": "The memory text to store"
                },
                "contact_id": {
                    "type": "string",
                    "description": "Optional contact the memory is about"
                },
                "user_id": {
                    "type": "string",
                    "description": "Handled automatically; do not supply"
                }
            },
            "required": ["memory"]
        })
    }

    fn contextual_params(&self) -> &[&str] {
        &["user_id"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let memory = arguments["memory"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'memory' argument".into()))?;
        let user_id = arguments["user_id"].as_str().unwrap_or_default();
        let contact_id = arguments["contact_id"].as_str();

        match self.memory.add(user_id, memory, contact_id).await {
            Ok(id) => Ok(ToolOutcome::ok(format!("Memory stored ({id})"))),
            Err(e) => Ok(ToolOutcome::err(format!("Memory store failed: {e}"))),
        }
    }
}

/// Searches the current user's memories by similarity.
pub struct SearchMemoryTool {
    memory: Arc<dyn MemoryStore>,
}

impl SearchMemoryTool {
    pub fn new(memory: Arc<dyn MemoryStore>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for SearchMemoryTool {
    fn name(&self) -> &str {
        "search_memory"
    }

    fn description(&self) -> &str {
        "Search the current user's memories by similarity. Set search_all_collections to also \
         search memories filed under the user's contacts."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "n_results": {
                    "type": "integer",
                    "description": "Maximum results to return (default 10)",
                    "default": 10
                },
                "search_all_collections": {
                    "type": "boolean",
                    "description": "Also search the user's contact collections",
                    "default": false
                },
                "user_id": {
                    "type": "string",
                    "description": "Handled automatically; do not supply"
                }
            },
            "required": ["query"]
        })
    }

    fn contextual_params(&self) -> &[&str] {
        &["user_id"]
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
    ) -> std::result::Result<ToolOutcome, ToolError> {
        let query_text = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;
        let user_id = arguments["user_id"].as_str().unwrap_or_default();
        let limit = arguments["n_results"].as_u64().unwrap_or(10) as usize;
        let all_scopes = arguments["search_all_collections"].as_bool().unwrap_or(false);

        let mut query = MemoryQuery::new(query_text).with_limit(limit);
        if all_scopes {
            query = query.all_scopes();
        }

        match self.memory.search(user_id, &query).await {
            Ok(records) => {
                let data = serde_json::to_value(&records).unwrap_or_default();
                let summary = if records.is_empty() {
                    "No matching memories.".to_string()
                } else {
                    records
                        .iter()
                        .map(|r| format!("[{}] {}", r.collection, r.content))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                Ok(ToolOutcome::ok(summary).with_data(data))
            }
            Err(e) => Ok(ToolOutcome::err(format!("Memory search failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_store::{InMemoryMemoryStore, InMemoryStatusStore};

    #[tokio::test]
    async fn write_then_read_status_roundtrip() {
        let store: Arc<dyn StatusStore> = Arc::new(InMemoryStatusStore::new());
        let write = WriteStatusTool::new(store.clone());
        let read = ReadStatusTool::new(store);

        let outcome = write
            .execute(serde_json::json!({
                "update": "Searching for the restaurant's number",
                "conversation_id": "conv_1"
            }))
            .await
            .unwrap();
        assert!(outcome.success);

        let outcome = read
            .execute(serde_json::json!({"conversation_id": "conv_1"}))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("Searching for the restaurant"));
    }

    #[tokio::test]
    async fn read_status_empty_conversation() {
        let store: Arc<dyn StatusStore> = Arc::new(InMemoryStatusStore::new());
        let read = ReadStatusTool::new(store);

        let outcome = read
            .execute(serde_json::json!({"conversation_id": "conv_none"}))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("No status updates"));
    }

    #[tokio::test]
    async fn add_then_search_memory() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let add = AddMemoryTool::new(store.clone());
        let search = SearchMemoryTool::new(store);

        let outcome = add
            .execute(serde_json::json!({
                "memory": "User prefers aisle seats on long flights",
                "user_id": "user_1"
            }))
            .await
            .unwrap();
        assert!(outcome.success);

        let outcome = search
            .execute(serde_json::json!({
                "query": "aisle seats flights",
                "user_id": "user_1"
            }))
            .await
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.output.contains("aisle seats"));
    }

    #[tokio::test]
    async fn search_memory_respects_all_collections_flag() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        store
            .add("user_1", "Maria asked about the quarterly report", Some("contact_maria"))
            .await
            .unwrap();
        let search = SearchMemoryTool::new(store);

        let own_only = search
            .execute(serde_json::json!({
                "query": "quarterly report",
                "user_id": "user_1"
            }))
            .await
            .unwrap();
        assert!(own_only.output.contains("No matching memories"));

        let all = search
            .execute(serde_json::json!({
                "query": "quarterly report",
                "user_id": "user_1",
                "search_all_collections": true
            }))
            .await
            .unwrap();
        assert!(all.output.contains("quarterly report"));
    }

    #[tokio::test]
    async fn store_failure_is_failed_outcome() {
        let store: Arc<dyn MemoryStore> = Arc::new(InMemoryMemoryStore::new());
        let add = AddMemoryTool::new(store);
        let outcome = add
            .execute(serde_json::json!({"memory": "   ", "user_id": "user_1"}))
            .await
            .unwrap();
        assert!(!outcome.success);
    }
}
