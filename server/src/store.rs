//! Offline queue and presence flag storage.
//!
//! Disconnected recipients accumulate messages in a per-user FIFO list
//! keyed `user:<id>:offline_messages`, drained in one step at reconnect.
//! Production deployments point `redis_url` at a Redis instance; the
//! in-memory backend serves single-process setups and the test suite.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

use crate::delivery::{StreamedMessage, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Redis key holding a recipient's offline backlog.
fn offline_key(user_id: UserId) -> String {
    format!("user:{}:offline_messages", user_id)
}

/// Redis key holding a user's online flag.
fn online_key(user_id: UserId) -> String {
    format!("user:{}:online", user_id)
}

#[derive(Clone)]
pub enum OfflineStore {
    Redis(ConnectionManager),
    Memory(MemoryStore),
}

/// Process-local backend. Queues are partitioned per recipient; each
/// operation holds only that recipient's map entry.
#[derive(Clone, Default)]
pub struct MemoryStore {
    queues: Arc<DashMap<UserId, VecDeque<String>>>,
    online: Arc<DashMap<UserId, bool>>,
}

impl OfflineStore {
    /// Connect to Redis. The connection manager reconnects on failure.
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::Redis(manager))
    }

    /// In-memory store with no durability across restarts.
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::default())
    }

    /// Append a message to the tail of the recipient's offline queue.
    /// Never blocks on delivery; queues are unbounded.
    pub async fn enqueue_offline(
        &self,
        user_id: UserId,
        message: &StreamedMessage,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_string(message)?;
        match self {
            Self::Redis(manager) => {
                let mut conn = manager.clone();
                let _: () = conn.rpush(offline_key(user_id), payload).await?;
            }
            Self::Memory(store) => {
                store.queues.entry(user_id).or_default().push_back(payload);
            }
        }
        Ok(())
    }

    /// Read and clear the recipient's offline queue in one step, returning
    /// messages in enqueue order. The read and the delete are atomic, so a
    /// message enqueued concurrently is either returned here or left for
    /// the next drain, never cleared unread. Entries that fail to decode
    /// are logged and skipped.
    pub async fn drain_offline(&self, user_id: UserId) -> Result<Vec<StreamedMessage>, StoreError> {
        let raw: Vec<String> = match self {
            Self::Redis(manager) => {
                let mut conn = manager.clone();
                let key = offline_key(user_id);
                let (entries, _deleted): (Vec<String>, i64) = redis::pipe()
                    .atomic()
                    .lrange(&key, 0, -1)
                    .del(&key)
                    .query_async(&mut conn)
                    .await?;
                entries
            }
            Self::Memory(store) => store
                .queues
                .remove(&user_id)
                .map(|(_, queue)| queue.into_iter().collect())
                .unwrap_or_default(),
        };

        let mut messages = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<StreamedMessage>(&entry) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Skipping undecodable offline queue entry");
                }
            }
        }
        Ok(messages)
    }

    /// Put messages back at the head of the queue, preserving their order
    /// ahead of anything enqueued since the drain. Used when a backlog
    /// replay is interrupted mid-write.
    pub async fn requeue_offline(
        &self,
        user_id: UserId,
        messages: &[StreamedMessage],
    ) -> Result<(), StoreError> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut payloads = Vec::with_capacity(messages.len());
        for message in messages {
            payloads.push(serde_json::to_string(message)?);
        }
        match self {
            Self::Redis(manager) => {
                let mut conn = manager.clone();
                // LPUSH in reverse so messages[0] ends up at the head
                let reversed: Vec<&String> = payloads.iter().rev().collect();
                let _: () = conn.lpush(offline_key(user_id), reversed).await?;
            }
            Self::Memory(store) => {
                let mut queue = store.queues.entry(user_id).or_default();
                for payload in payloads.into_iter().rev() {
                    queue.push_front(payload);
                }
            }
        }
        Ok(())
    }

    /// Best-effort presence flag. Not part of the delivery guarantee;
    /// callers log and swallow failures.
    pub async fn set_online(&self, user_id: UserId, online: bool) -> Result<(), StoreError> {
        match self {
            Self::Redis(manager) => {
                let mut conn = manager.clone();
                let _: () = conn
                    .set(online_key(user_id), if online { "1" } else { "0" })
                    .await?;
            }
            Self::Memory(store) => {
                store.online.insert(user_id, online);
            }
        }
        Ok(())
    }

    pub async fn is_online(&self, user_id: UserId) -> Result<bool, StoreError> {
        match self {
            Self::Redis(manager) => {
                let mut conn = manager.clone();
                let flag: Option<String> = conn.get(online_key(user_id)).await?;
                Ok(flag.as_deref() == Some("1"))
            }
            Self::Memory(store) => Ok(store
                .online
                .get(&user_id)
                .map(|entry| *entry.value())
                .unwrap_or(false)),
        }
    }
}
