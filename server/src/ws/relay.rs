//! Bridges one WebSocket client to the delivery engine: an inbound loop
//! parsing client send frames and an outbound session task streaming
//! backlog and live pushes. Either half ending terminates the other.

use axum::extract::ws::{Message, WebSocket};
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::delivery::{self, RecipientIds, UserId};
use crate::error::DeliveryError;
use crate::state::AppState;
use crate::ws::registry::RegistrationGuard;
use crate::ws::{session, DeliverySink, Outbound, SINK_CAPACITY};

/// A client-submitted send frame:
/// `{"receiver_id": <id or [ids]>, "content": "..."}`
#[derive(Debug, Deserialize)]
struct SendFrame {
    receiver_id: RecipientIds,
    content: String,
}

/// Run one authenticated connection until either half stops.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let (writer, mut reader) = socket.split();
    let (sink, rx) = mpsc::channel::<Outbound>(SINK_CAPACITY);

    // Register before the session drains the backlog: sends arriving from
    // here on land in the sink rather than the offline queue.
    let session_id = state.registry.register(user_id, sink.clone());
    let guard = RegistrationGuard::new(&state.registry, user_id, session_id);

    // Presence flag is a best-effort side channel
    if let Err(e) = state.store.set_online(user_id, true).await {
        tracing::warn!(user_id, error = %e, "Failed to set online flag");
    }

    tracing::info!(user_id, "Session started");

    let mut outbound = tokio::spawn(session::run(writer, state.clone(), user_id, guard, rx));

    loop {
        tokio::select! {
            // Outbound half ended (write error or sink closed): stop reading too
            result = &mut outbound => {
                if let Ok(Err(e)) = result {
                    tracing::debug!(user_id, error = %e, "Outbound relay ended");
                }
                break;
            }
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_send_frame(&state, user_id, &sink, text.as_str()).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(user_id, reason = ?frame, "Client closed connection");
                    break;
                }
                // Pings are answered by the protocol layer; binary frames
                // are not part of this protocol
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(user_id, error = %e, "WebSocket receive error");
                    break;
                }
                None => break,
            },
        }
    }

    // Stops the session if it is still draining or relaying; its
    // registration guard deregisters either way.
    outbound.abort();

    if let Err(e) = state.store.set_online(user_id, false).await {
        tracing::warn!(user_id, error = %e, "Failed to clear online flag");
    }

    tracing::info!(user_id, "Session ended");
}

/// Parse and dispatch one inbound frame. Malformed frames produce an
/// inline error without dropping the connection.
async fn handle_send_frame(state: &AppState, user_id: UserId, sink: &DeliverySink, text: &str) {
    let frame: SendFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            send_error(
                sink,
                "invalid send frame: expected {\"receiver_id\": id | [ids], \"content\": string}",
            )
            .await;
            return;
        }
    };

    let receiver_ids = frame.receiver_id.into_vec();
    match delivery::deliver(state, user_id, &receiver_ids, &frame.content).await {
        Ok(report) => {
            for failure in &report.failures {
                send_error(
                    sink,
                    &format!(
                        "failed to deliver to receiver {}: {}",
                        failure.receiver_id, failure.error
                    ),
                )
                .await;
            }
        }
        Err(DeliveryError::Validation(reason)) => send_error(sink, &reason).await,
        Err(e) => {
            tracing::error!(user_id, error = %e, "Send dispatch failed");
            send_error(sink, "failed to deliver message").await;
        }
    }
}

/// Queue an error frame behind whatever the session is writing. Blocking
/// here only backpressures this client's own inbound loop.
async fn send_error(sink: &DeliverySink, error: &str) {
    if sink.send(Outbound::Error(error.to_string())).await.is_err() {
        tracing::debug!("Session gone before error frame could be sent");
    }
}
