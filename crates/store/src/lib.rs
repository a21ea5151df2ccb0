//! Status and memory store clients for Maestro.
//!
//! The status log and the memory store are the only persisted state the
//! agent loop depends on, and the only shared mutable resource between
//! concurrently running agents. Both are exposed as traits so the loop can
//! run against the HTTP-backed global tools API in production and against
//! in-process backends in tests.

pub mod http;
pub mod in_memory;

pub use http::{HttpMemoryStore, HttpStatusStore};
pub use in_memory::{InMemoryMemoryStore, InMemoryStatusStore};

use async_trait::async_trait;
use maestro_core::error::StoreError;
use maestro_core::memory::{MemoryQuery, MemoryRecord};
use maestro_core::status::{StatusFilter, StatusUpdate};

/// Append-only status log keyed by conversation.
///
/// Writes are best-effort from the loop's perspective: a failed write is
/// logged but does not fail the task. Reads that feed a completion
/// decision are retried with bounded backoff by the implementation.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// The backend name (e.g., "http", "in_memory").
    fn name(&self) -> &str;

    /// Append a status update. Returns the new update's id.
    async fn write(
        &self,
        agent_id: &str,
        agent_type: &str,
        conversation_id: &str,
        update: &str,
    ) -> Result<String, StoreError>;

    /// Read a conversation's updates in ascending timestamp order,
    /// optionally filtered by agent type/id.
    async fn read(
        &self,
        conversation_id: &str,
        filter: &StatusFilter,
    ) -> Result<Vec<StatusUpdate>, StoreError>;
}

/// Scoped, similarity-searchable memory store.
///
/// Memories live in collections derived from their owner: the user's own
/// collection or one per contact of that user. Searching with
/// `all_scopes` covers the owner's own collection plus that owner's
/// contact collections and never another owner's — a hard privacy
/// invariant, not an optimization.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// The backend name.
    fn name(&self) -> &str;

    /// Store a memory for a user, optionally under one of their contact's
    /// collections. Returns the new memory's id.
    async fn add(
        &self,
        user_id: &str,
        memory: &str,
        contact_id: Option<&str>,
    ) -> Result<String, StoreError>;

    /// Search the user's memories ranked by similarity.
    async fn search(
        &self,
        user_id: &str,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>, StoreError>;
}
