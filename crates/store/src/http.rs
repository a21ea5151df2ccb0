//! HTTP-backed store clients against the global tools API.
//!
//! Endpoints:
//! - `POST /api/status/write` / `POST /api/status/read`
//! - `POST /api/memory/add` / `POST /api/memory/search`
//!
//! Writes are single attempts surfaced as errors for the caller to treat
//! as best-effort. Reads retry with bounded backoff because the loop's
//! completion decisions may depend on them.

use crate::{MemoryStore, StatusStore};
use async_trait::async_trait;
use maestro_core::error::StoreError;
use maestro_core::memory::{MemoryQuery, MemoryRecord, MemoryScope};
use maestro_core::status::{StatusFilter, StatusUpdate};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration shared by both HTTP store clients.
#[derive(Debug, Clone)]
pub struct HttpStoreConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub read_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8090".into(),
            timeout: Duration::from_secs(30),
            read_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

/// HTTP client for the status log.
pub struct HttpStatusStore {
    client: reqwest::Client,
    config: HttpStoreConfig,
}

impl HttpStatusStore {
    pub fn new(client: reqwest::Client, config: HttpStoreConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Serialize)]
struct WriteStatusRequest<'a> {
    agent_id: &'a str,
    agent_type: &'a str,
    conversation_id: &'a str,
    update: &'a str,
}

#[derive(Deserialize)]
struct WriteStatusResponse {
    status_update_id: String,
}

#[derive(Serialize)]
struct ReadStatusRequest<'a> {
    conversation_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_type: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct ReadStatusResponse {
    status_updates: Vec<StatusUpdate>,
}

#[async_trait]
impl StatusStore for HttpStatusStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn write(
        &self,
        agent_id: &str,
        agent_type: &str,
        conversation_id: &str,
        update: &str,
    ) -> Result<String, StoreError> {
        let body = WriteStatusRequest {
            agent_id,
            agent_type,
            conversation_id,
            update,
        };

        let response = self
            .client
            .post(self.url("/api/status/write"))
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::WriteFailed(format!("HTTP {status}: {text}")));
        }

        let parsed: WriteStatusResponse = response
            .json()
            .await
            .map_err(|e| StoreError::WriteFailed(format!("bad response: {e}")))?;
        debug!(conversation_id, id = %parsed.status_update_id, "Status update written");
        Ok(parsed.status_update_id)
    }

    async fn read(
        &self,
        conversation_id: &str,
        filter: &StatusFilter,
    ) -> Result<Vec<StatusUpdate>, StoreError> {
        let body = ReadStatusRequest {
            conversation_id,
            agent_type: filter.agent_type.as_deref(),
            agent_id: filter.agent_id.as_deref(),
        };

        let mut last_error = StoreError::Unavailable("no attempts made".into());
        for attempt in 0..=self.config.read_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_backoff * attempt).await;
            }

            let result = self
                .client
                .post(self.url("/api/status/read"))
                .timeout(self.config.timeout)
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    let parsed: ReadStatusResponse = response
                        .json()
                        .await
                        .map_err(|e| StoreError::QueryFailed(format!("bad response: {e}")))?;
                    let mut updates = parsed.status_updates;
                    updates.sort_by_key(|u| u.timestamp);
                    return Ok(updates);
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    warn!(conversation_id, status, attempt, "Status read failed");
                    last_error = StoreError::QueryFailed(format!("HTTP {status}"));
                }
                Err(e) => {
                    warn!(conversation_id, error = %e, attempt, "Status read unreachable");
                    last_error = StoreError::Unavailable(e.to_string());
                }
            }
        }

        Err(last_error)
    }
}

/// HTTP client for the memory store.
pub struct HttpMemoryStore {
    client: reqwest::Client,
    config: HttpStoreConfig,
}

impl HttpMemoryStore {
    pub fn new(client: reqwest::Client, config: HttpStoreConfig) -> Self {
        Self { client, config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Serialize)]
struct AddMemoryRequest<'a> {
    user_id: &'a str,
    memory: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    contact_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct AddMemoryResponse {
    memory_id: String,
}

#[derive(Serialize)]
struct SearchMemoryRequest<'a> {
    user_id: &'a str,
    query: &'a str,
    n_results: usize,
    search_all_collections: bool,
}

#[derive(Deserialize)]
struct SearchMemoryResponse {
    memories: Vec<MemoryHit>,
}

#[derive(Deserialize)]
struct MemoryHit {
    id: String,
    memory: String,
    memory_type: String,
    collection_name: String,
    #[serde(default)]
    distance: Option<f32>,
}

impl MemoryHit {
    fn into_record(self) -> MemoryRecord {
        let scope = if self.memory_type == "contact" {
            MemoryScope::Contact
        } else {
            MemoryScope::User
        };
        MemoryRecord {
            id: self.id,
            content: self.memory,
            scope,
            collection: self.collection_name,
            distance: self.distance,
        }
    }
}

#[async_trait]
impl MemoryStore for HttpMemoryStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn add(
        &self,
        user_id: &str,
        memory: &str,
        contact_id: Option<&str>,
    ) -> Result<String, StoreError> {
        let body = AddMemoryRequest {
            user_id,
            memory,
            contact_id,
        };

        let response = self
            .client
            .post(self.url("/api/memory/add"))
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(StoreError::WriteFailed(format!("HTTP {status}: {text}")));
        }

        let parsed: AddMemoryResponse = response
            .json()
            .await
            .map_err(|e| StoreError::WriteFailed(format!("bad response: {e}")))?;
        Ok(parsed.memory_id)
    }

    async fn search(
        &self,
        user_id: &str,
        query: &MemoryQuery,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        let body = SearchMemoryRequest {
            user_id,
            query: &query.query,
            n_results: query.limit.clamp(1, 50),
            search_all_collections: query.all_scopes,
        };

        let mut last_error = StoreError::Unavailable("no attempts made".into());
        for attempt in 0..=self.config.read_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_backoff * attempt).await;
            }

            let result = self
                .client
                .post(self.url("/api/memory/search"))
                .timeout(self.config.timeout)
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    let parsed: SearchMemoryResponse = response
                        .json()
                        .await
                        .map_err(|e| StoreError::QueryFailed(format!("bad response: {e}")))?;
                    return Ok(parsed
                        .memories
                        .into_iter()
                        .map(MemoryHit::into_record)
                        .collect());
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    warn!(user_id, status, attempt, "Memory search failed");
                    last_error = StoreError::QueryFailed(format!("HTTP {status}"));
                }
                Err(e) => {
                    warn!(user_id, error = %e, attempt, "Memory store unreachable");
                    last_error = StoreError::Unavailable(e.to_string());
                }
            }
        }

        Err(last_error)
    }
}
