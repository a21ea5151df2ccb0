//! In-process store backends — used in tests and ephemeral runs.
//!
//! The memory backend scores by keyword overlap rather than embeddings;
//! ranking semantics (lower distance = more similar, cross-collection
//! merge, result cap) match the HTTP backend.

use crate::{MemoryStore, StatusStore};
use async_trait::async_trait;
use chrono::Utc;
use maestro_core::error::StoreError;
use maestro_core::memory::{MemoryQuery, MemoryRecord, MemoryScope};
use maestro_core::status::{StatusFilter, StatusUpdate};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

const MAX_RESULTS: usize = 50;

/// An in-memory append-only status log.
pub struct InMemoryStatusStore {
    updates: RwLock<Vec<StatusUpdate>>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self {
            updates: RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn write(
        &self,
        agent_id: &str,
        agent_type: &str,
        conversation_id: &str,
        update: &str,
    ) -> Result<String, StoreError> {
        if conversation_id.trim().is_empty() {
            return Err(StoreError::InvalidRequest(
                "conversation_id cannot be empty".into(),
            ));
        }
        if update.trim().is_empty() {
            return Err(StoreError::InvalidRequest("update cannot be empty".into()));
        }

        let record = StatusUpdate {
            id: Uuid::new_v4().to_string(),
            agent_id: agent_id.trim().to_string(),
            agent_type: agent_type.trim().to_string(),
            conversation_id: conversation_id.trim().to_string(),
            update: update.trim().to_string(),
            timestamp: Utc::now(),
        };
        let id = record.id.clone();
        self.updates.write().await.push(record);
        Ok(id)
    }

    async fn read(
        &self,
        conversation_id: &str,
        filter: &StatusFilter,
    ) -> Result<Vec<StatusUpdate>, StoreError> {
        let updates = self.updates.read().await;
        let mut results: Vec<StatusUpdate> = updates
            .iter()
            .filter(|u| u.conversation_id == conversation_id && filter.matches(u))
            .cloned()
            .collect();
        results.sort_by_key(|u| u.timestamp);
        Ok(results)
    }
}

/// One stored memory inside the in-memory backend.
#[derive(Clone)]
struct StoredMemory {
    id: String,
    content: String,
    scope: MemoryScope,
    collection: String,
}

/// An in-memory scoped memory store.
///
/// Collections are keyed per owner: `collections[user_id]` maps a
/// collection name (the user id itself, or a contact id) to its memories.
pub struct InMemoryMemoryStore {
    collections: RwLock<HashMap<String, HashMap<String, Vec<StoredMemory>>>>,
}

impl InMemoryMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Keyword-overlap distance: fraction of query words absent from the
    /// content. 0.0 = every query word present.
    fn distance(query: &str, content: &str) -> f32 {
        let content_lower = content.to_lowercase();
        let words: Vec<&str> = query.split_whitespace().collect();
        if words.is_empty() {
            return 1.0;
        }
        let hits = words
            .iter()
            .filter(|w| content_lower.contains(&w.to_lowercase()))
            .count();
        1.0 - hits as f32 / words.len() as f32
    }
}

impl Default for InMemoryMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MemoryStore for InMemoryMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn add(
        &self,
        user_id: &str,
        memory: &str,
        contact_id: Option<&str>,
    ) -> Result<String, StoreError> {
        if memory.trim().is_empty() {
            return Err(StoreError::InvalidRequest("memory cannot be empty".into()));
        }

        let (collection, scope) = match contact_id {
            Some(contact) => (contact.to_string(), MemoryScope::Contact),
            None => (user_id.to_string(), MemoryScope::User),
        };

        let stored = StoredMemory {
            id: Uuid::new_v4().to_string(),
            content: memory.trim().to_string(),
            scope,
            collection: collection.clone(),
        };
        let id = stored.id.clone();

        self.collections
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .entry(collection)
            .or_default()
            .push(stored);

        Ok(id)
    }

    async fn search(
        &self,
        user_id: &str,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        if query.query.trim().is_empty() {
            return Err(StoreError::InvalidRequest("query cannot be empty".into()));
        }
        let limit = query.limit.clamp(1, MAX_RESULTS);

        let collections = self.collections.read().await;
        let Some(owned) = collections.get(user_id) else {
            return Ok(Vec::new());
        };

        // Only this owner's collections are ever candidates: their own
        // collection, plus (with all_scopes) their contact collections.
        let mut results: Vec<MemoryRecord> = owned
            .iter()
            .filter(|(name, _)| query.all_scopes || name.as_str() == user_id)
            .flat_map(|(_, memories)| memories.iter())
            .map(|m| MemoryRecord {
                id: m.id.clone(),
                content: m.content.clone(),
                scope: m.scope.clone(),
                collection: m.collection.clone(),
                distance: Some(Self::distance(&query.query, &m.content)),
            })
            .filter(|r| r.distance.unwrap_or(1.0) < 1.0)
            .collect();

        results.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }
}
