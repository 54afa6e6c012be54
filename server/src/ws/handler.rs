use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt::{self, AuthError};
use crate::state::AppState;
use crate::ws::relay;

/// Query parameters for WebSocket connection. Auth is via query param
/// because browsers cannot set headers on WebSocket upgrades.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: String,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. Authenticates via query parameter.
/// On auth failure, upgrades then immediately closes with the appropriate
/// close code; no registry or presence mutation happens.
/// On success, hands the socket to the transport relay.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    match jwt::resolve_identity(&state.jwt_secret, &params.token) {
        Ok(user_id) => {
            tracing::info!(user_id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| relay::run_connection(socket, state, user_id))
        }
        Err(err) => {
            let (close_code, reason) = match err {
                AuthError::Expired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
                AuthError::Invalid | AuthError::MalformedSubject => {
                    (CLOSE_TOKEN_INVALID, "Token invalid")
                }
            };

            tracing::warn!(
                close_code = close_code,
                reason = reason,
                "WebSocket auth failed"
            );

            // Upgrade the connection, then immediately close with the error code
            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}
