use crate::db::DbPool;
use crate::store::OfflineStore;
use crate::ws::registry::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Active delivery sinks per user
    pub registry: ConnectionRegistry,
    /// Offline queue and presence flags (Redis or in-memory)
    pub store: OfflineStore,
}
