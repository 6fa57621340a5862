//! Shared application state for the Axum API server.

use std::sync::Arc;

use casedesk_common::config::AppConfig;
use casedesk_engine::directory::PgDirectory;
use casedesk_engine::guard::DedupGuard;
use casedesk_engine::store::PgNotificationStore;
use casedesk_engine::{EngineConfig, FanoutOrchestrator};
use casedesk_notifier::ConnectionHub;
use sqlx::PgPool;

/// Application state shared across all route handlers via Axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: AppConfig,
    pub hub: Arc<ConnectionHub>,
    pub engine: Arc<FanoutOrchestrator>,
}

impl AppState {
    /// Wire the Postgres-backed engine and the live connection hub.
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        let engine_config = EngineConfig::from_app_config(&config);
        let hub = Arc::new(ConnectionHub::new(config.live_queue_capacity));

        let engine = FanoutOrchestrator::new(
            Arc::new(PgDirectory::new(pool.clone())),
            Arc::new(PgNotificationStore::new(pool.clone())),
            hub.clone(),
            Arc::new(DedupGuard::new(engine_config.dedup_window)),
            engine_config,
        );

        Self {
            pool,
            config,
            hub,
            engine: Arc::new(engine),
        }
    }
}
