//! One recipient's connected lifetime: replay the offline backlog, then
//! relay live pushes until the connection or the inbound half ends.
//!
//! The delivery sink is registered by the relay before this task starts,
//! so a send racing the backlog drain lands in the sink and follows the
//! backlog instead of being enqueued behind it or lost.

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::SinkExt;
use tokio::sync::mpsc;

use crate::delivery::{StreamedMessage, UserId};
use crate::error::DeliveryError;
use crate::state::AppState;
use crate::ws::registry::RegistrationGuard;
use crate::ws::Outbound;

/// Outbound half of a connection: owns the socket write side.
/// Holds the registration guard, so the registry entry is released on
/// every exit path, including abort by the inbound half.
pub async fn run(
    mut writer: SplitSink<WebSocket, Message>,
    state: AppState,
    user_id: UserId,
    guard: RegistrationGuard,
    mut rx: mpsc::Receiver<Outbound>,
) -> Result<(), DeliveryError> {
    let _guard = guard;

    replay_backlog(&mut writer, &state, user_id).await?;

    while let Some(outbound) = rx.recv().await {
        let frame = match &outbound {
            Outbound::Push(message) => encode_push(message),
            Outbound::Error(error) => encode_error(error),
        };
        let Some(frame) = frame else { continue };
        writer
            .send(frame)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;
    }

    Ok(())
}

/// Drain the offline queue and write it out in FIFO order. On a write
/// failure the unsent remainder goes back to the head of the queue for
/// the next session, trading possible redelivery for no loss.
async fn replay_backlog(
    writer: &mut SplitSink<WebSocket, Message>,
    state: &AppState,
    user_id: UserId,
) -> Result<(), DeliveryError> {
    let backlog = match state.store.drain_offline(user_id).await {
        Ok(backlog) => backlog,
        Err(e) => {
            // Live relay still works without the backlog; the queue is
            // untouched and will drain on the next connection.
            tracing::error!(user_id, error = %e, "Failed to drain offline queue");
            return Ok(());
        }
    };

    if backlog.is_empty() {
        return Ok(());
    }
    tracing::info!(user_id, count = backlog.len(), "Replaying offline backlog");

    for (index, message) in backlog.iter().enumerate() {
        let Some(frame) = encode_push(message) else {
            continue;
        };
        if let Err(e) = writer.send(frame).await {
            tracing::warn!(user_id, error = %e, "Backlog replay interrupted, requeueing remainder");
            if let Err(e) = state.store.requeue_offline(user_id, &backlog[index..]).await {
                tracing::error!(user_id, error = %e, "Failed to requeue undelivered backlog");
            }
            return Err(DeliveryError::Transport(e.to_string()));
        }
    }

    Ok(())
}

fn encode_push(message: &StreamedMessage) -> Option<Message> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode outbound message");
            None
        }
    }
}

fn encode_error(error: &str) -> Option<Message> {
    serde_json::to_string(&serde_json::json!({ "error": error }))
        .ok()
        .map(|json| Message::Text(json.into()))
}
