//! REST submission path. Internal service callers and clients without a
//! streaming connection submit sends here; delivery semantics are the
//! same as for WebSocket send frames.

use axum::{extract::State, Json};
use serde::Deserialize;

use crate::auth::middleware::Identity;
use crate::delivery::{self, RecipientIds, SendReport};
use crate::error::DeliveryError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// A single recipient id or a list of ids
    pub receiver_id: RecipientIds,
    pub content: String,
}

/// POST /api/messages — Submit a message to one or more recipients.
/// JWT auth required. Returns the aggregate delivery status; per-recipient
/// failures are enumerated without rolling back successful recipients.
pub async fn send_message(
    State(state): State<AppState>,
    Identity(sender_id): Identity,
    Json(body): Json<SendMessageRequest>,
) -> Result<Json<SendReport>, DeliveryError> {
    let receiver_ids = body.receiver_id.into_vec();
    let report = delivery::deliver(&state, sender_id, &receiver_ids, &body.content).await?;
    Ok(Json(report))
}
