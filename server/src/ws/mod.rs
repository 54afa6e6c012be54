pub mod handler;
pub mod registry;
pub mod relay;
pub mod session;

use tokio::sync::mpsc;

use crate::delivery::StreamedMessage;

/// Capacity of each session's delivery sink. A full sink means the
/// consumer is not keeping up; senders fall back to the offline queue
/// instead of waiting.
pub const SINK_CAPACITY: usize = 32;

/// Items flowing to one connected client through its delivery sink.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A chat message pushed live by the delivery engine.
    Push(StreamedMessage),
    /// An inline error frame for a rejected inbound request.
    Error(String),
}

/// Sender half of a session's bounded delivery sink. The delivery engine
/// pushes into clones of this handed out by the connection registry.
pub type DeliverySink = mpsc::Sender<Outbound>;
