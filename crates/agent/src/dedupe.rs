//! Inbound message idempotency.
//!
//! Sub-agents react to external replies, and reply delivery is
//! at-least-once: the same inbound message can arrive twice (webhook
//! retries, poller overlap, process restarts). Each message is processed
//! at most once, keyed by an identifier that survives upstream id
//! instability — the message's own id when present, otherwise a
//! deterministic derivation from its content.
//!
//! The set is held in bounded memory and mirrored to sqlite so the
//! guarantee holds across restarts.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::{HashSet, VecDeque};
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Messages older than this are stale and skipped (still marked
/// processed so they are not re-examined).
pub const MAX_MESSAGE_AGE_SECS: i64 = 60;

const MAX_IN_MEMORY: usize = 10_000;
const TRIM_TO: usize = 5_000;

/// An inbound message from an external messaging surface.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    /// Upstream message id, when the surface provides a stable one
    #[serde(default)]
    pub id: Option<String>,

    pub sender: String,

    /// The chat the message arrived in (group or direct chat identifier)
    #[serde(default)]
    pub chat: String,

    pub content: String,

    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// The idempotency key for this message: the upstream id when
    /// present, otherwise sender + chat + a content hash + timestamp.
    pub fn message_id(&self) -> String {
        if let Some(id) = &self.id
            && !id.is_empty()
        {
            return id.clone();
        }

        let mut hasher = Sha256::new();
        hasher.update(self.content.as_bytes());
        let content_hash = hex_prefix(&hasher.finalize(), 8);

        format!(
            "{}_{}_{}_{}",
            self.sender,
            self.chat,
            content_hash,
            self.timestamp.timestamp()
        )
    }

    /// Whether the message is too old to act on.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        (now - self.timestamp).num_seconds() > MAX_MESSAGE_AGE_SECS
    }
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .flat_map(|b| [b >> 4, b & 0xf])
        .take(len)
        .map(|n| char::from_digit(n as u32, 16).unwrap_or('0'))
        .collect()
}

struct SeenSet {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

/// The durable processed-message set.
pub struct ProcessedMessages {
    seen: Mutex<SeenSet>,
    pool: Option<SqlitePool>,
}

impl ProcessedMessages {
    /// In-memory only set (tests, ephemeral runs).
    pub fn in_memory() -> Self {
        Self {
            seen: Mutex::new(SeenSet {
                ids: HashSet::new(),
                order: VecDeque::new(),
            }),
            pool: None,
        }
    }

    /// Open (or create) the sqlite-backed set at the given path and warm
    /// the in-memory cache from it.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS processed_messages (
                id TEXT PRIMARY KEY,
                processed_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        let mut ids = HashSet::new();
        let mut order = VecDeque::new();
        let rows = sqlx::query("SELECT id FROM processed_messages ORDER BY processed_at DESC LIMIT ?")
            .bind(TRIM_TO as i64)
            .fetch_all(&pool)
            .await?;
        for row in rows {
            let id: String = row.get("id");
            order.push_back(id.clone());
            ids.insert(id);
        }
        debug!(loaded = ids.len(), "Loaded processed message ids");

        Ok(Self {
            seen: Mutex::new(SeenSet { ids, order }),
            pool: Some(pool),
        })
    }

    /// Whether this id has already been processed.
    pub async fn is_processed(&self, id: &str) -> bool {
        if self.seen.lock().await.ids.contains(id) {
            return true;
        }

        if let Some(pool) = &self.pool {
            match sqlx::query("SELECT 1 FROM processed_messages WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await
            {
                Ok(Some(_)) => {
                    self.remember(id).await;
                    return true;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Processed-message lookup failed"),
            }
        }

        false
    }

    /// Atomically claim an id for processing. Returns true exactly once
    /// per id: the caller that gets true runs the downstream action. The
    /// in-memory set is checked and updated under one lock so two
    /// concurrent deliveries cannot both claim.
    pub async fn claim(&self, id: &str) -> bool {
        let mut seen = self.seen.lock().await;
        if seen.ids.contains(id) {
            return false;
        }

        if let Some(pool) = &self.pool {
            match sqlx::query("SELECT 1 FROM processed_messages WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await
            {
                Ok(Some(_)) => {
                    Self::insert_bounded(&mut seen, id);
                    return false;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Processed-message lookup failed"),
            }
        }

        Self::insert_bounded(&mut seen, id);
        drop(seen);
        self.persist(id).await;
        true
    }

    /// Record an id as processed, in memory and durably.
    pub async fn mark_processed(&self, id: &str) {
        self.remember(id).await;
        self.persist(id).await;
    }

    async fn remember(&self, id: &str) {
        let mut seen = self.seen.lock().await;
        Self::insert_bounded(&mut seen, id);
    }

    async fn persist(&self, id: &str) {
        if let Some(pool) = &self.pool
            && let Err(e) = sqlx::query(
                "INSERT OR IGNORE INTO processed_messages (id, processed_at) VALUES (?, ?)",
            )
            .bind(id)
            .bind(Utc::now().to_rfc3339())
            .execute(pool)
            .await
        {
            warn!(error = %e, "Failed to persist processed message id");
        }
    }

    fn insert_bounded(seen: &mut SeenSet, id: &str) {
        if seen.ids.insert(id.to_string()) {
            seen.order.push_back(id.to_string());
        }

        // Keep the in-memory set bounded; sqlite retains the full history.
        if seen.ids.len() > MAX_IN_MEMORY {
            while seen.ids.len() > TRIM_TO {
                if let Some(oldest) = seen.order.pop_front() {
                    seen.ids.remove(&oldest);
                } else {
                    break;
                }
            }
        }
    }

    /// Current in-memory set size.
    pub async fn len(&self) -> usize {
        self.seen.lock().await.ids.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(content: &str) -> InboundMessage {
        InboundMessage {
            id: None,
            sender: "447874943523".into(),
            chat: "447874943523@c.us".into(),
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn upstream_id_wins() {
        let mut msg = message("hello");
        msg.id = Some("wamid.ABC123".into());
        assert_eq!(msg.message_id(), "wamid.ABC123");
    }

    #[test]
    fn derived_id_is_deterministic() {
        let msg = message("see you at 8");
        assert_eq!(msg.message_id(), msg.message_id());

        let mut replay = msg.clone();
        replay.id = None;
        assert_eq!(msg.message_id(), replay.message_id());
    }

    #[test]
    fn derived_id_differs_by_content() {
        let a = message("yes");
        let b = message("no");
        assert_ne!(a.message_id(), b.message_id());
    }

    #[test]
    fn staleness_check() {
        let now = Utc::now();
        let mut msg = message("old news");
        msg.timestamp = now - Duration::seconds(120);
        assert!(msg.is_stale(now));

        msg.timestamp = now - Duration::seconds(10);
        assert!(!msg.is_stale(now));
    }

    #[tokio::test]
    async fn claim_is_at_most_once() {
        let set = ProcessedMessages::in_memory();
        let id = message("hello").message_id();

        let mut actions = 0;
        for _ in 0..2 {
            if set.claim(&id).await {
                actions += 1;
            }
        }
        assert_eq!(actions, 1);
        assert!(set.is_processed(&id).await);
    }

    #[tokio::test]
    async fn distinct_ids_both_claimed() {
        let set = ProcessedMessages::in_memory();
        assert!(set.claim("a").await);
        assert!(set.claim("b").await);
        assert_eq!(set.len().await, 2);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("processed.db");
        let path = path.to_str().unwrap();

        {
            let set = ProcessedMessages::open(path).await.unwrap();
            assert!(set.claim("persistent_id").await);
        }

        let reopened = ProcessedMessages::open(path).await.unwrap();
        assert!(reopened.is_processed("persistent_id").await);
        assert!(!reopened.claim("persistent_id").await);
    }

    #[tokio::test]
    async fn in_memory_set_stays_bounded() {
        let set = ProcessedMessages::in_memory();
        for i in 0..(MAX_IN_MEMORY + 10) {
            set.mark_processed(&format!("id_{i}")).await;
        }
        assert!(set.len().await <= MAX_IN_MEMORY);
        // The most recent ids are retained
        assert!(set.is_processed(&format!("id_{}", MAX_IN_MEMORY + 9)).await);
    }
}
