use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Courier message delivery server
#[derive(Parser, Serialize, Deserialize, Clone, Debug)]
#[command(name = "courier-server", version, about = "Courier message delivery server")]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "COURIER_PORT", default_value = "8080")]
    pub port: u16,

    /// Bind address
    #[arg(long, env = "COURIER_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Path to TOML config file
    #[arg(long, default_value = "./courier.toml")]
    pub config: String,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "COURIER_JSON_LOGS")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key)
    #[arg(long, env = "COURIER_DATA_DIR", default_value = "./data")]
    pub data_dir: String,

    /// Redis URL for the offline queue and presence flags
    /// (loaded from the TOML file or COURIER_REDIS_URL; in-memory fallback when unset)
    #[arg(skip)]
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./courier.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            redis_url: None,
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (COURIER_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Config::parse();
        let config_path = cli.config.clone();

        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("COURIER_"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Courier Message Delivery Server Configuration
# Place this file at ./courier.toml or specify with --config <path>
# All settings can be overridden via environment variables (COURIER_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0 — all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite message store and JWT signing key
# data_dir = "./data"

# Redis URL for the offline message queue and presence flags.
# When unset, an in-memory store is used: queued messages and presence
# do not survive a restart.
# redis_url = "redis://127.0.0.1:6379"
"#
    .to_string()
}
