//! Per-recipient delivery decision: live fan-out to a registered sink,
//! durable enqueue for disconnected recipients.
//!
//! Each recipient is routed independently. A full or closed sink is
//! treated the same as an absent one, so a slow consumer backpressures
//! into the offline queue instead of blocking the sender. Every message
//! is also appended to the history table regardless of delivery path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::DbPool;
use crate::error::{DeliveryError, RouteError};
use crate::state::AppState;
use crate::ws::Outbound;

/// Numeric user identifier used as the delivery routing key.
pub type UserId = i64;

/// Maximum message content length (chars).
pub const MAX_CONTENT_LENGTH: usize = 4000;

/// One pushed chat record, as streamed to clients and as stored in the
/// offline queue: `{"sender_id": .., "content": .., "timestamp": ..}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamedMessage {
    pub sender_id: UserId,
    pub content: String,
    /// RFC 3339 timestamp assigned at send time.
    pub timestamp: DateTime<Utc>,
}

/// Recipient field accepted on the wire: a single id or a list of ids.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RecipientIds {
    One(UserId),
    Many(Vec<UserId>),
}

impl RecipientIds {
    pub fn into_vec(self) -> Vec<UserId> {
        match self {
            Self::One(id) => vec![id],
            Self::Many(ids) => ids,
        }
    }
}

/// How a message reached (or will reach) one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    /// Pushed into the recipient's live sink.
    Live,
    /// Appended to the recipient's offline queue.
    Queued,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientOutcome {
    pub receiver_id: UserId,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientFailure {
    pub receiver_id: UserId,
    pub error: String,
}

/// Aggregate result of one send call. `status` is "sent" when every
/// recipient was handled, "partial" when some (but not all) failed.
#[derive(Debug, Serialize)]
pub struct SendReport {
    pub status: &'static str,
    pub accepted: Vec<RecipientOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<RecipientFailure>,
}

/// Route one message to each recipient.
///
/// Recipients are independent: a failure on one never aborts the others,
/// and there is no shared transaction. The call errors only when the
/// request is malformed or when every single recipient failed.
pub async fn deliver(
    state: &AppState,
    sender_id: UserId,
    receiver_ids: &[UserId],
    content: &str,
) -> Result<SendReport, DeliveryError> {
    if receiver_ids.is_empty() {
        return Err(DeliveryError::Validation(
            "at least one receiver_id is required".to_string(),
        ));
    }
    let content = content.trim();
    if content.is_empty() {
        return Err(DeliveryError::Validation(
            "content must not be empty".to_string(),
        ));
    }
    if content.len() > MAX_CONTENT_LENGTH {
        return Err(DeliveryError::Validation(format!(
            "content exceeds {} characters",
            MAX_CONTENT_LENGTH
        )));
    }

    let mut accepted = Vec::with_capacity(receiver_ids.len());
    let mut failures = Vec::new();

    for &receiver_id in receiver_ids {
        let message = StreamedMessage {
            sender_id,
            content: content.to_string(),
            timestamp: Utc::now(),
        };

        match route_one(state, receiver_id, message).await {
            Ok(disposition) => accepted.push(RecipientOutcome {
                receiver_id,
                disposition,
            }),
            Err(e) => {
                tracing::warn!(receiver_id, error = %e, "Delivery failed for recipient");
                failures.push(RecipientFailure {
                    receiver_id,
                    error: e.to_string(),
                });
            }
        }
    }

    if accepted.is_empty() {
        return Err(DeliveryError::TotalFailure { failures });
    }

    let status = if failures.is_empty() { "sent" } else { "partial" };
    Ok(SendReport {
        status,
        accepted,
        failures,
    })
}

/// Deliver to a single recipient: opportunistic live push, offline queue
/// as the backstop, history append either way.
async fn route_one(
    state: &AppState,
    receiver_id: UserId,
    message: StreamedMessage,
) -> Result<Disposition, RouteError> {
    let disposition = match state.registry.lookup(receiver_id) {
        Some(sink) => match sink.try_send(Outbound::Push(message.clone())) {
            Ok(()) => Disposition::Live,
            // A full sink means the consumer is not keeping up; a closed
            // sink is a session mid-teardown. Both fall back to the queue.
            Err(_) => {
                state.store.enqueue_offline(receiver_id, &message).await?;
                Disposition::Queued
            }
        },
        None => {
            state.store.enqueue_offline(receiver_id, &message).await?;
            Disposition::Queued
        }
    };

    persist_message(&state.db, receiver_id, &message).await?;
    Ok(disposition)
}

/// Append one message row to the history table.
async fn persist_message(
    db: &DbPool,
    receiver_id: UserId,
    message: &StreamedMessage,
) -> Result<(), RouteError> {
    let db = db.clone();
    let message = message.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| RouteError::History("db lock poisoned".to_string()))?;
        conn.execute(
            "INSERT INTO messages (sender_id, receiver_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                message.sender_id,
                receiver_id,
                message.content,
                message.timestamp.to_rfc3339(),
            ],
        )
        .map_err(|e| RouteError::History(e.to_string()))?;
        Ok(())
    })
    .await
    .map_err(|e| RouteError::History(e.to_string()))?
}
