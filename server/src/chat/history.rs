//! Message history endpoints backed by the messages table.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::auth::middleware::Identity;
use crate::delivery::UserId;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub sender_id: UserId,
    pub content: String,
    pub sent_at: String,
}

/// GET /api/messages — The latest message from each sender to the caller,
/// newest conversation first. JWT auth required.
pub async fn list_conversations(
    State(state): State<AppState>,
    Identity(user_id): Identity,
) -> Result<Json<Vec<ConversationSummary>>, StatusCode> {
    let db = state.db.clone();

    let rows = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let mut stmt = conn
            .prepare(
                "SELECT sender_id, content, created_at FROM messages
                 WHERE id IN (
                     SELECT MAX(id) FROM messages WHERE receiver_id = ?1 GROUP BY sender_id
                 )
                 ORDER BY id DESC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let rows: Vec<ConversationSummary> = stmt
            .query_map(rusqlite::params![user_id], |row| {
                Ok(ConversationSummary {
                    sender_id: row.get(0)?,
                    content: row.get(1)?,
                    sent_at: row.get(2)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>(rows)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
pub struct HistoryEntry {
    pub content: String,
    pub sent_at: String,
}

#[derive(Debug, Serialize)]
pub struct SenderHistory {
    pub sender_id: UserId,
    pub messages: Vec<HistoryEntry>,
}

/// GET /api/messages/{sender_id} — All messages from one sender to the
/// caller, oldest first. JWT auth required.
pub async fn list_by_sender(
    State(state): State<AppState>,
    Identity(user_id): Identity,
    Path(sender_id): Path<UserId>,
) -> Result<Json<SenderHistory>, StatusCode> {
    let db = state.db.clone();

    let messages = tokio::task::spawn_blocking(move || {
        let conn = db.lock().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let mut stmt = conn
            .prepare(
                "SELECT content, created_at FROM messages
                 WHERE sender_id = ?1 AND receiver_id = ?2
                 ORDER BY created_at ASC, id ASC",
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let messages: Vec<HistoryEntry> = stmt
            .query_map(rusqlite::params![sender_id, user_id], |row| {
                Ok(HistoryEntry {
                    content: row.get(0)?,
                    sent_at: row.get(1)?,
                })
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter_map(|r| r.ok())
            .collect();

        Ok::<_, StatusCode>(messages)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(SenderHistory {
        sender_id,
        messages,
    }))
}
