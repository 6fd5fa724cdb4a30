//! Application bootstrap: validate config, wire the pools together and
//! spawn the background loops.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use sg_domain::config::{Config, ConfigSeverity};
use sg_pool::{ConnectionPool, ServerPool};
use sg_sessions::SessionManager;

use crate::builtin::{BuiltinExecutor, PooledHandlerFactory};
use crate::router::{CompatPolicy, TransportRouter};
use crate::state::AppState;

/// Validate config and return a fully-wired [`AppState`].  Must run inside
/// a tokio runtime (the connection pool spawns its workers here).
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }

    // ── Sessions ─────────────────────────────────────────────────────
    let sessions = Arc::new(SessionManager::from_config(&config.sessions));

    // ── Connection pool ──────────────────────────────────────────────
    let executor = Arc::new(BuiltinExecutor::new(Some(Arc::clone(&sessions))));
    let pool = Arc::new(ConnectionPool::new(
        &config.pool,
        executor,
        Some(Arc::clone(&sessions)),
    ));
    sessions.subscribe(pool.clone());

    // ── Server pool ──────────────────────────────────────────────────
    let factory = Arc::new(PooledHandlerFactory::new(
        Arc::clone(&pool),
        config.transport.accepted_versions.clone(),
    ));
    let servers = Arc::new(ServerPool::new(&config.servers, factory));

    // ── Router ───────────────────────────────────────────────────────
    let compat = CompatPolicy::from_config(&config.transport);
    tracing::info!(
        enabled = compat.enabled,
        versions = ?compat.versions,
        "compat handshake policy"
    );
    let router = TransportRouter::new(
        Arc::clone(&sessions),
        Arc::clone(&servers),
        Arc::clone(&pool),
        compat,
    );

    Ok(AppState {
        config,
        sessions,
        pool,
        servers,
        router,
        started_at: chrono::Utc::now(),
        shutdown: CancellationToken::new(),
    })
}

/// Spawn the idle sweep and the queue watchdog.  Both stop when
/// `state.shutdown` is cancelled.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Idle sweep ───────────────────────────────────────────────────
    let interval = state.config.sessions.sweep_interval();
    state
        .sessions
        .spawn_sweeper(interval, state.shutdown.child_token());
    tracing::info!(
        interval_secs = interval.as_secs(),
        timeout_secs = state.config.sessions.timeout_secs,
        "session sweeper started"
    );

    // ── Queue watchdog ───────────────────────────────────────────────
    {
        let pool = Arc::clone(&state.pool);
        let cancel = state.shutdown.child_token();
        let warn_after = state.config.pool.request_timeout() / 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(age) = pool.oldest_queued_age() {
                            if age >= warn_after {
                                let stats = pool.stats();
                                tracing::warn!(
                                    oldest_ms = age.as_millis() as u64,
                                    queued = stats.queued,
                                    active = stats.active,
                                    "connection pool queue is backing up"
                                );
                            }
                        }
                    }
                }
            }
        });
    }
}

/// Graceful teardown: stop background loops, close transports, drop
/// handlers and drain the connection pool.
pub async fn shutdown(state: &AppState) {
    state.shutdown.cancel();
    state.router.shutdown();
    state.servers.shutdown();
    state.pool.shutdown().await;
    tracing::info!(sessions = state.sessions.len(), "gateway state torn down");
}
