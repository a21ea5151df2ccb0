//! Memory domain types.
//!
//! Memories are immutable text snippets stored under a collection derived
//! from their owner: the user's own collection, or one per contact of that
//! user. Retrieval is by semantic similarity, and searching "all scopes"
//! covers the owner's own collection plus that owner's contact collections
//! and never crosses into another owner's data.

use serde::{Deserialize, Serialize};

/// Whether a memory belongs to the user directly or to one of their contacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    User,
    Contact,
}

/// A stored memory as returned from a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique memory ID
    pub id: String,

    /// The memory text
    pub content: String,

    /// Whether this came from the user's own or a contact's collection
    pub scope: MemoryScope,

    /// The collection the memory was found in (user id or contact id)
    pub collection: String,

    /// Similarity distance (lower = more similar); None when the backend
    /// does not report one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

/// A memory search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// The search text
    pub query: String,

    /// Maximum number of results (capped at 50 by the store)
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Search the owner's own collection plus all of that owner's contact
    /// collections. Never searches another owner's collections.
    #[serde(default)]
    pub all_scopes: bool,
}

fn default_limit() -> usize {
    10
}

impl MemoryQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: default_limit(),
            all_scopes: false,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn all_scopes(mut self) -> Self {
        self.all_scopes = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_defaults() {
        let query = MemoryQuery::new("favorite restaurant");
        assert_eq!(query.limit, 10);
        assert!(!query.all_scopes);
    }

    #[test]
    fn query_builder() {
        let query = MemoryQuery::new("meeting").with_limit(5).all_scopes();
        assert_eq!(query.limit, 5);
        assert!(query.all_scopes);
    }

    #[test]
    fn record_serialization() {
        let record = MemoryRecord {
            id: "mem_001".into(),
            content: "Prefers window seats on flights".into(),
            scope: MemoryScope::Contact,
            collection: "contact_9".into(),
            distance: Some(0.12),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("window seats"));
        assert!(json.contains("contact"));
    }
}
