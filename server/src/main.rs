use tokio::net::TcpListener;

use courier_server::auth::jwt;
use courier_server::config::{generate_config_template, Config};
use courier_server::db;
use courier_server::routes;
use courier_server::state::AppState;
use courier_server::store::OfflineStore;
use courier_server::ws::registry::ConnectionRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "courier_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "courier_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("Courier server v{} starting", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite message store
    let db = db::init_db(&config.data_dir)?;

    // Load or generate the JWT signing key (256-bit random, stored in data_dir).
    // The auth service issuing tokens must share this key.
    let jwt_secret = jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Offline queue backend: Redis when configured, in-memory otherwise
    let store = match &config.redis_url {
        Some(url) => {
            let store = OfflineStore::connect(url).await?;
            tracing::info!("Offline queue backed by Redis at {}", url);
            store
        }
        None => {
            tracing::warn!(
                "No redis_url configured; offline queue is in-memory and will not survive restarts"
            );
            OfflineStore::memory()
        }
    };

    // Build application state
    let app_state = AppState {
        db,
        jwt_secret,
        registry: ConnectionRegistry::new(),
        store,
    };

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
