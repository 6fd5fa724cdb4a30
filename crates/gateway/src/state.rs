use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use sg_domain::config::Config;
use sg_pool::{ConnectionPool, ServerPool};
use sg_sessions::SessionManager;

use crate::router::TransportRouter;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub pool: Arc<ConnectionPool>,
    pub servers: Arc<ServerPool>,
    pub router: Arc<TransportRouter>,
    pub started_at: DateTime<Utc>,
    /// Cancelled on graceful shutdown; background loops watch it.
    pub shutdown: CancellationToken,
}
