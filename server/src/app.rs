//! Shared application state and the HTTP router.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use tracing::info;
use webshell_core::connection::ConnectionStore;
use webshell_core::files::FileManager;
use webshell_core::monitoring::ResourceMonitor;
use webshell_core::pool::SshConnectionPool;
use webshell_core::terminal::TerminalBridge;
use webshell_core::transport::Connector;

use crate::config::ServerConfig;
use crate::routes;

/// Components shared by every request handler.
pub struct AppState {
    pub pool: Arc<SshConnectionPool>,
    pub files: FileManager,
    pub terminals: TerminalBridge,
    pub monitor: ResourceMonitor,
}

impl AppState {
    pub fn new(
        config: &ServerConfig,
        store: Arc<dyn ConnectionStore>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let pool = Arc::new(SshConnectionPool::new(
            connector.clone(),
            config.pool.clone(),
        ));
        Self {
            files: FileManager::new(store.clone(), pool.clone()),
            terminals: TerminalBridge::new(store.clone(), connector, config.terminal.clone()),
            monitor: ResourceMonitor::new(store, pool.clone(), config.monitor.clone()),
            pool,
        }
    }

    /// Stop monitor subscriptions, close terminals and disconnect every
    /// pooled session. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.monitor.shutdown().await;
        self.terminals.close_all().await;
        self.pool.close_all().await;
        info!("All SSH sessions closed");
    }
}

pub fn router(state: Arc<AppState>, config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/ssh/pool/stats", get(routes::pool_stats))
        .route("/api/ssh/terminal", get(routes::ws::terminal))
        .route("/api/ssh/resources", get(routes::ws::resources))
        .nest("/api/ssh-files", routes::files::router())
        .layer(DefaultBodyLimit::max(config.max_upload_bytes()))
        .with_state(state)
}
