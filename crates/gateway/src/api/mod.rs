pub mod health;
pub mod mcp;
pub mod sessions;
pub mod stats;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // MCP endpoint (session-routed JSON-RPC)
        .route("/mcp", post(mcp::post).delete(mcp::delete))
        .route("/mcp/ping", post(mcp::ping))
        // Diagnostics
        .route("/v1/health", get(health::health))
        .route("/v1/stats", get(stats::stats))
        .route("/v1/servers", get(stats::list_servers))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:id", get(sessions::get_session))
}
