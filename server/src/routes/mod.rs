//! HTTP and WebSocket route handlers.

pub mod files;
pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use webshell_core::pool::PoolStats;

use crate::app::AppState;
use crate::error::ApiResponse;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn pool_stats(State(state): State<Arc<AppState>>) -> Json<ApiResponse<PoolStats>> {
    ApiResponse::ok("Pool statistics", state.pool.stats().await)
}
