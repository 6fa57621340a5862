use std::str::FromStr;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Port the API server binds to on all interfaces (default: 3000)
    pub api_port: u16,

    /// JWT secret for API authentication
    pub jwt_secret: String,

    /// JWT token expiry in hours
    pub jwt_expiry_hours: u64,

    /// Rolling window in seconds during which a (recipient, dedup key) pair
    /// is notified at most once (default: 60)
    pub dedup_window_secs: u64,

    /// Per-recipient budget in milliseconds for persisting and delivering a
    /// notification when the event carries no deadline (default: 5000)
    pub notify_timeout_ms: u64,

    /// Bounded queue size of each live connection (default: 32)
    pub live_queue_capacity: usize,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            api_port: parse_var("API_PORT", 3000)?,
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?,
            jwt_expiry_hours: parse_var("JWT_EXPIRY_HOURS", 24)?,
            dedup_window_secs: parse_var("DEDUP_WINDOW_SECS", 60)?,
            notify_timeout_ms: parse_var("NOTIFY_TIMEOUT_MS", 5000)?,
            live_queue_capacity: parse_var("LIVE_QUEUE_CAPACITY", 32)?,
        })
    }
}

/// Read `name` from the environment, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        }),
        Err(_) => Ok(default),
    }
}
