//! Capacity diagnostics.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

/// GET /v1/stats: pool utilization, queue depth, server handles, transport
/// and compat counters.
pub async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.router.stats())
}

/// GET /v1/servers: live handler handles, oldest first.
pub async fn list_servers(State(state): State<AppState>) -> impl IntoResponse {
    let servers = state.servers.list();
    Json(serde_json::json!({
        "count": servers.len(),
        "servers": servers,
    }))
}
