//! Identity to delivery sink map shared by all sessions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::delivery::UserId;
use crate::ws::DeliverySink;

/// Identifies one registration, so a late deregister cannot clobber a
/// newer session registered under the same identity.
pub type SessionId = u64;

struct RegisteredSink {
    session_id: SessionId,
    sink: DeliverySink,
}

/// Concurrency-safe map from user identity to that user's active delivery
/// sink. At most one live entry per identity; registering again replaces
/// the previous entry (last-registered-wins). Lookups clone the sink out
/// of the map, so no shard lock is ever held while pushing a message.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<DashMap<UserId, RegisteredSink>>,
    next_session_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace the sink for `user_id`. Returns the session id
    /// the caller must present to `deregister`.
    pub fn register(&self, user_id: UserId, sink: DeliverySink) -> SessionId {
        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .insert(user_id, RegisteredSink { session_id, sink });
        tracing::debug!(user_id, session_id, "Delivery sink registered");
        session_id
    }

    /// Clone the sink registered for `user_id`, if any.
    pub fn lookup(&self, user_id: UserId) -> Option<DeliverySink> {
        self.inner.get(&user_id).map(|entry| entry.sink.clone())
    }

    /// Remove the entry for `user_id` only if it still belongs to
    /// `session_id`. Returns whether an entry was removed. Safe to call
    /// repeatedly and after a replacing registration.
    pub fn deregister(&self, user_id: UserId, session_id: SessionId) -> bool {
        let removed = self
            .inner
            .remove_if(&user_id, |_, entry| entry.session_id == session_id)
            .is_some();
        if removed {
            tracing::debug!(user_id, session_id, "Delivery sink deregistered");
        }
        removed
    }

    /// Whether `user_id` currently has a registered sink.
    pub fn is_connected(&self, user_id: UserId) -> bool {
        self.inner.contains_key(&user_id)
    }
}

/// Owns one registration and releases it on drop, so deregistration runs
/// on every session exit path, including abort.
pub struct RegistrationGuard {
    registry: ConnectionRegistry,
    user_id: UserId,
    session_id: SessionId,
}

impl RegistrationGuard {
    pub fn new(registry: &ConnectionRegistry, user_id: UserId, session_id: SessionId) -> Self {
        Self {
            registry: registry.clone(),
            user_id,
            session_id,
        }
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.deregister(self.user_id, self.session_id);
    }
}
