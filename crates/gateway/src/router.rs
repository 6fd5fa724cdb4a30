//! Per-request session routing.
//!
//! For every inbound JSON-RPC request the router decides whether to reuse
//! the session's live transport, lazily rebuild one (running the
//! compatibility handshake when the client skipped `initialize`), or mint
//! a fresh session.
//!
//! Lock discipline: the transport table lock is only held for map
//! mutation.  `SessionManager` and `ServerPool` are always called without
//! it, because their eviction listeners re-enter the router.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use sg_domain::config::TransportConfig;
use sg_domain::error::{Error, Result};
use sg_domain::trace::TraceEvent;
use sg_pool::{ConnectionPool, PoolStats, ServerEvent, ServerListener, ServerPool, ServerStats};
use sg_protocol::{InitializeParams, JsonRpcRequest, JsonRpcResponse, RequestKind};
use sg_sessions::{SessionEvent, SessionListener, SessionManager};

use crate::transport::Transport;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Compat policy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Synthesized-initialize policy for clients that skip the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatPolicy {
    pub enabled: bool,
    /// Versions to try, in order.
    pub versions: Vec<String>,
}

impl CompatPolicy {
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            enabled: config.compat_init,
            versions: config.compat_versions.clone(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            versions: Vec::new(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome & stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the HTTP layer sends back for one routed request.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    /// Session the request ended up bound to, echoed in the session header.
    pub session_id: Option<String>,
    /// `None` for notifications.
    pub response: Option<JsonRpcResponse>,
    pub status: u16,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransportStats {
    pub live: usize,
    pub total_opened: u64,
    pub compat_attempted: u64,
    pub compat_succeeded: u64,
    pub compat_failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub live: usize,
    pub max_sessions: usize,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    pub sessions: SessionStats,
    pub pool: PoolStats,
    pub servers: ServerStats,
    pub transports: TransportStats,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct TransportTable {
    map: Mutex<HashMap<String, Arc<Transport>>>,
    live: AtomicUsize,
    total: AtomicU64,
}

impl TransportTable {
    fn get(&self, session_id: &str) -> Option<Arc<Transport>> {
        self.map.lock().get(session_id).cloned()
    }

    /// Insert `transport` unless an open one is already bound to the
    /// session.  Returns the bound transport and whether it is the new one.
    fn insert_if_absent(&self, transport: Arc<Transport>) -> (Arc<Transport>, bool) {
        let mut map = self.map.lock();
        if let Some(existing) = map.get(transport.session_id()) {
            if !existing.is_closed() {
                return (Arc::clone(existing), false);
            }
        }
        let replaced = map.insert(transport.session_id().to_owned(), Arc::clone(&transport));
        if replaced.is_none() {
            self.live.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        (transport, true)
    }

    /// Remove the entry only if it is still `transport`.
    fn remove_exact(
        &self,
        session_id: &str,
        transport: *const Transport,
    ) -> Option<Arc<Transport>> {
        let mut map = self.map.lock();
        match map.get(session_id) {
            Some(current) if Arc::as_ptr(current) == transport => {
                let removed = map.remove(session_id);
                self.live.fetch_sub(1, Ordering::Relaxed);
                removed
            }
            _ => None,
        }
    }

    fn snapshot(&self) -> Vec<Arc<Transport>> {
        self.map.lock().values().cloned().collect()
    }

    fn live(&self) -> usize {
        self.live.load(Ordering::Relaxed)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TransportRouter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TransportRouter {
    this: Weak<TransportRouter>,
    sessions: Arc<SessionManager>,
    servers: Arc<ServerPool>,
    pool: Arc<ConnectionPool>,
    compat: CompatPolicy,
    table: TransportTable,
    compat_attempted: AtomicU64,
    compat_succeeded: AtomicU64,
    compat_failed: AtomicU64,
}

impl TransportRouter {
    /// Build the router and subscribe it to session and server lifecycle
    /// events.
    pub fn new(
        sessions: Arc<SessionManager>,
        servers: Arc<ServerPool>,
        pool: Arc<ConnectionPool>,
        compat: CompatPolicy,
    ) -> Arc<Self> {
        let router = Arc::new_cyclic(|this| Self {
            this: this.clone(),
            sessions,
            servers,
            pool,
            compat,
            table: TransportTable::default(),
            compat_attempted: AtomicU64::new(0),
            compat_succeeded: AtomicU64::new(0),
            compat_failed: AtomicU64::new(0),
        });

        let listener = Arc::new(RouterListener(Arc::downgrade(&router)));
        router.sessions.subscribe(listener.clone());
        router.servers.subscribe(listener);
        router
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Route one JSON-RPC request or notification.
    pub async fn dispatch(
        &self,
        session_id: Option<&str>,
        request: JsonRpcRequest,
    ) -> RouteOutcome {
        let is_notification = request.is_notification();
        let id = request.id.clone();

        let kind = match RequestKind::try_from(&request) {
            Ok(kind) => kind,
            Err(e) => {
                return RouteOutcome {
                    session_id: session_id.map(str::to_owned),
                    status: e.http_status(),
                    response: Some(JsonRpcResponse::from_result(id, Err(e))),
                };
            }
        };

        let (bound, result) = match kind {
            RequestKind::Ping => (session_id.map(str::to_owned), Ok(self.ping(session_id))),
            RequestKind::Close => match session_id {
                Some(sid) => (
                    Some(sid.to_owned()),
                    self.close_session(sid).map(|()| json!({ "closed": true })),
                ),
                None => (
                    None,
                    Err(Error::InvalidRequest(
                        "session/close requires a session id".into(),
                    )),
                ),
            },
            kind => {
                let (sid, result) = self.route(session_id, kind).await;
                (Some(sid), result)
            }
        };

        if is_notification {
            if let Err(e) = &result {
                tracing::debug!(error = %e, "notification failed");
            }
            return RouteOutcome {
                session_id: bound,
                response: None,
                status: 202,
            };
        }

        let status = match &result {
            Ok(_) => 200,
            Err(e) => e.http_status(),
        };
        RouteOutcome {
            session_id: bound,
            response: Some(JsonRpcResponse::from_result(id, result)),
            status,
        }
    }

    /// Keepalive.  Touches the session without entering the state machine.
    pub fn ping(&self, session_id: Option<&str>) -> Value {
        if let Some(sid) = session_id {
            self.sessions.touch_session(sid);
        }
        json!({ "ok": true, "sessionId": session_id })
    }

    /// Explicit close: tear down the transport, its handler and the session.
    pub fn close_session(&self, session_id: &str) -> Result<()> {
        let Some(transport) = self.table.get(session_id) else {
            return Err(Error::SessionNotFound(session_id.to_owned()));
        };
        transport.close();
        self.sessions.remove_session(session_id);
        tracing::info!(session_id = %session_id, "session closed by client");
        Ok(())
    }

    pub fn live_transports(&self) -> usize {
        self.table.live()
    }

    pub fn transport(&self, session_id: &str) -> Option<Arc<Transport>> {
        self.table.get(session_id)
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            sessions: SessionStats {
                live: self.sessions.len(),
                max_sessions: self.sessions.max_sessions(),
                timeout_secs: self.sessions.timeout().as_secs(),
            },
            pool: self.pool.stats(),
            servers: self.servers.get_stats(),
            transports: TransportStats {
                live: self.table.live(),
                total_opened: self.table.total.load(Ordering::Relaxed),
                compat_attempted: self.compat_attempted.load(Ordering::Relaxed),
                compat_succeeded: self.compat_succeeded.load(Ordering::Relaxed),
                compat_failed: self.compat_failed.load(Ordering::Relaxed),
            },
        }
    }

    /// Close every transport.
    pub fn shutdown(&self) {
        let transports = self.table.snapshot();
        let count = transports.len();
        for transport in transports {
            transport.close();
        }
        tracing::info!(transports = count, "router closed all transports");
    }

    // ── State machine ────────────────────────────────────────────────

    async fn route(&self, session_id: Option<&str>, kind: RequestKind) -> (String, Result<Value>) {
        let sid = match session_id {
            Some(sid) => sid.to_owned(),
            None => {
                let minted = Uuid::new_v4().to_string();
                tracing::debug!(session_id = %minted, "minted session id");
                minted
            }
        };

        if let Some(transport) = self.table.get(&sid).filter(|t| !t.is_closed()) {
            self.sessions.count_request(&sid);
            self.servers.touch_server(&sid);
            return (sid, transport.handle(kind).await);
        }

        let needs_compat_init = !kind.is_initialize();
        tracing::debug!(
            session_id = %sid,
            method = kind.method(),
            compat_init = needs_compat_init,
            "no open transport, attaching"
        );
        let transport = match self.attach(&sid, needs_compat_init) {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(session_id = %sid, error = %e, "no transport obtainable");
                return (
                    sid.clone(),
                    Err(Error::NoActiveTransport { session_id: sid }),
                );
            }
        };

        if needs_compat_init && self.compat.enabled && !transport.is_initialized() {
            self.compat_init(&transport).await;
        }

        (sid, transport.handle(kind).await)
    }

    /// Bind a new transport to `session_id`, registering the session and
    /// building its handler.  A transport bound concurrently wins.
    fn attach(&self, session_id: &str, compat_init: bool) -> Result<Arc<Transport>> {
        self.sessions.get_or_create_session(session_id);
        self.sessions.count_request(session_id);
        let handler = self.servers.get_or_create_server(session_id)?;

        let (transport, inserted) = self
            .table
            .insert_if_absent(Arc::new(Transport::new(session_id, handler)));
        if !inserted {
            return Ok(transport);
        }

        let router = self.this.clone();
        let bound = Arc::downgrade(&transport);
        transport.on_close(move |sid| {
            if let Some(router) = router.upgrade() {
                router.transport_closed(sid, bound.as_ptr());
            }
        });

        TraceEvent::TransportOpened {
            session_id: session_id.to_owned(),
            live_transports: self.table.live(),
            compat_init,
        }
        .emit();
        Ok(transport)
    }

    fn transport_closed(&self, session_id: &str, transport: *const Transport) {
        let Some(removed) = self.table.remove_exact(session_id, transport) else {
            return;
        };
        self.servers.remove_server(session_id, removed.handler());
        TraceEvent::TransportClosed {
            session_id: session_id.to_owned(),
            live_transports: self.table.live(),
        }
        .emit();
    }

    /// Synthesize `initialize` for a client that skipped it, trying each
    /// configured version in order.  Fails open.
    async fn compat_init(&self, transport: &Transport) -> Option<String> {
        self.compat_attempted.fetch_add(1, Ordering::Relaxed);
        let session_id = transport.session_id().to_owned();
        let mut attempts = 0;
        let mut accepted = None;

        for version in &self.compat.versions {
            attempts += 1;
            let init = RequestKind::Initialize(InitializeParams::synthesized(version.as_str()));
            match transport.handle(init).await {
                Ok(_) => {
                    accepted = Some(version.clone());
                    break;
                }
                Err(Error::ProtocolVersionMismatch { .. }) => {
                    tracing::debug!(
                        session_id = %session_id,
                        version = %version,
                        "compat version rejected"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %session_id,
                        error = %e,
                        "compat initialize failed"
                    );
                    break;
                }
            }
        }

        if accepted.is_some() {
            let initialized = RequestKind::Call {
                method: sg_protocol::METHOD_INITIALIZED.into(),
                params: Value::Null,
            };
            if let Err(e) = transport.handle(initialized).await {
                tracing::debug!(
                    session_id = %session_id,
                    error = %e,
                    "initialized notification failed"
                );
            }
            self.compat_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.compat_failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                session_id = %session_id,
                attempts,
                "compat handshake exhausted, forwarding request"
            );
        }

        TraceEvent::CompatInit {
            session_id,
            attempts,
            accepted_version: accepted.clone(),
        }
        .emit();
        accepted
    }

    // ── Lifecycle listeners ──────────────────────────────────────────

    fn on_session_evicted(&self, session_id: &str) {
        match self.table.get(session_id) {
            Some(transport) => {
                transport.close();
            }
            None => {
                if let Some(handler) = self.servers.get_server(session_id) {
                    self.servers.remove_server(session_id, &handler);
                }
            }
        }
    }

    fn on_server_evicted(&self, session_id: &str) {
        if let Some(transport) = self.table.get(session_id) {
            transport.close();
        }
    }
}

/// Weak back-reference so the pools do not keep the router alive.
struct RouterListener(Weak<TransportRouter>);

impl SessionListener for RouterListener {
    fn on_session_event(&self, event: &SessionEvent) {
        if let SessionEvent::Evicted { session, .. } = event {
            if let Some(router) = self.0.upgrade() {
                router.on_session_evicted(&session.id);
            }
        }
    }
}

impl ServerListener for RouterListener {
    fn on_server_event(&self, event: &ServerEvent) {
        if let ServerEvent::Evicted { session_id } = event {
            if let Some(router) = self.0.upgrade() {
                router.on_server_evicted(session_id);
            }
        }
    }
}
