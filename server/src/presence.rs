//! Online presence flag. Best-effort side channel toggled by the
//! transport relay on connect and terminate; not part of the delivery
//! guarantee.

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
pub struct PresenceResponse {
    pub user_id: UserId,
    pub online: bool,
}

/// GET /api/presence/{user_id} — Whether a user currently has an active
/// receiving connection, per the presence flag. JWT auth required.
pub async fn get_presence(
    State(state): State<AppState>,
    Identity(_caller): Identity,
    Path(user_id): Path<UserId>,
) -> Result<Json<PresenceResponse>, StatusCode> {
    let online = state
        .store
        .is_online(user_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(PresenceResponse { user_id, online }))
}
