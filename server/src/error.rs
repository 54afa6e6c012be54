//! Failure taxonomy of the delivery path.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::delivery::RecipientFailure;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Missing, invalid, or expired credential. Terminates the request or
    /// session before any registry mutation.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Malformed request (empty recipient list, empty content). Rejected
    /// per-request; a streaming session continues.
    #[error("{0}")]
    Validation(String),

    /// Every recipient in the call failed. Partial failures are reported
    /// in the send report instead, with successful recipients untouched.
    #[error("delivery failed for all recipients")]
    TotalFailure { failures: Vec<RecipientFailure> },

    /// Connection read/write failure. The session terminates without
    /// retrying; the client reconnects and replays its offline queue.
    #[error("transport: {0}")]
    Transport(String),
}

/// Error routing a message to a single recipient. Collected into
/// per-recipient failures; never aborts the rest of a fan-out.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("offline queue: {0}")]
    Queue(#[from] StoreError),
    #[error("message store: {0}")]
    History(String),
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::TotalFailure { .. } | Self::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = match self {
            Self::TotalFailure { failures } => json!({
                "error": "delivery failed for all recipients",
                "failures": failures,
            }),
            other => json!({ "error": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
