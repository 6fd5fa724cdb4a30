use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use sg_domain::config::{Config, PoolConfig, ServerPoolConfig};
use sg_domain::error::{
    Error, Result, CODE_NOT_INITIALIZED, CODE_NO_ACTIVE_TRANSPORT, CODE_SESSION_NOT_FOUND,
};
use sg_gateway::bootstrap::build_app_state;
use sg_gateway::builtin::BuiltinExecutor;
use sg_gateway::router::{CompatPolicy, TransportRouter};
use sg_pool::{ConnectionPool, HandlerFactory, ProtocolHandler, ServerEvent, ServerPool};
use sg_protocol::{InitializeParams, InitializeResult, JsonRpcRequest, ServerInfo};
use sg_sessions::SessionManager;

// ── Fixtures ─────────────────────────────────────────────────────────

/// Accepts only `versions`; records every version it was asked about.
struct PickyHandler {
    versions: Vec<String>,
    asked: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ProtocolHandler for PickyHandler {
    fn supported_protocol_versions(&self) -> &[String] {
        &self.versions
    }

    fn accepts_protocol_version(&self, version: &str) -> bool {
        self.asked.lock().push(version.to_owned());
        self.versions.iter().any(|v| v == version)
    }

    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        Ok(InitializeResult {
            protocol_version: params.protocol_version,
            capabilities: json!({}),
            server_info: ServerInfo {
                name: "picky".into(),
                version: "0".into(),
            },
        })
    }

    async fn handle(&self, method: &str, _params: Value) -> Result<Value> {
        Ok(json!({ "handled": method }))
    }
}

struct PickyFactory {
    versions: Vec<String>,
    asked: Arc<Mutex<Vec<String>>>,
}

impl PickyFactory {
    fn new(versions: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            versions: versions.iter().map(|v| v.to_string()).collect(),
            asked: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn asked(&self) -> Vec<String> {
        self.asked.lock().clone()
    }
}

impl HandlerFactory for PickyFactory {
    fn create(&self, _session_id: &str) -> Result<Arc<dyn ProtocolHandler>> {
        Ok(Arc::new(PickyHandler {
            versions: self.versions.clone(),
            asked: Arc::clone(&self.asked),
        }))
    }
}

/// Refuses to build handlers.
struct BrokenFactory;

impl HandlerFactory for BrokenFactory {
    fn create(&self, session_id: &str) -> Result<Arc<dyn ProtocolHandler>> {
        Err(Error::HandlerCreation(format!("backend down for {session_id}")))
    }
}

fn compat_all() -> CompatPolicy {
    CompatPolicy {
        enabled: true,
        versions: vec![
            "2025-06-18".into(),
            "2025-03-26".into(),
            "2024-11-05".into(),
        ],
    }
}

fn router_with(factory: Arc<dyn HandlerFactory>, compat: CompatPolicy) -> Arc<TransportRouter> {
    let sessions = Arc::new(SessionManager::new(Duration::from_secs(60), 100));
    let pool = Arc::new(ConnectionPool::new(
        &PoolConfig::default(),
        Arc::new(BuiltinExecutor::new(None)),
        Some(Arc::clone(&sessions)),
    ));
    let servers = Arc::new(ServerPool::new(&ServerPoolConfig { max_servers: 8 }, factory));
    TransportRouter::new(sessions, servers, pool, compat)
}

fn initialize(version: &str) -> JsonRpcRequest {
    JsonRpcRequest::new(1, "initialize", Some(json!({ "protocolVersion": version })))
}

fn call(method: &str) -> JsonRpcRequest {
    JsonRpcRequest::new(2, method, None)
}

// ── Compat handshake ─────────────────────────────────────────────────

#[tokio::test]
async fn compat_tries_versions_in_order_until_one_is_accepted() {
    let factory = PickyFactory::new(&["2025-03-26"]);
    let router = router_with(factory.clone(), compat_all());

    let out = router.dispatch(Some("stale-42"), call("tools/list")).await;

    assert_eq!(out.session_id.as_deref(), Some("stale-42"));
    assert_eq!(out.status, 200);
    let response = out.response.unwrap();
    assert_eq!(response.into_result().unwrap(), json!({ "handled": "tools/list" }));
    assert_eq!(factory.asked(), vec!["2025-06-18", "2025-03-26"]);

    let transport = router.transport("stale-42").unwrap();
    assert_eq!(transport.protocol_version().as_deref(), Some("2025-03-26"));
    assert_eq!(router.stats().transports.compat_succeeded, 1);
}

#[tokio::test]
async fn compat_fails_open_with_the_transport_error() {
    let factory = PickyFactory::new(&["1999-01-01"]);
    let router = router_with(factory.clone(), compat_all());

    let out = router.dispatch(Some("old-client"), call("tools/list")).await;

    // Every version tried exactly once, then the request went through.
    assert_eq!(factory.asked(), vec!["2025-06-18", "2025-03-26", "2024-11-05"]);
    let err = out.response.unwrap().error.unwrap();
    assert_eq!(err.code, CODE_NOT_INITIALIZED);
    assert_eq!(router.stats().transports.compat_failed, 1);
}

#[tokio::test]
async fn disabled_compat_skips_the_handshake() {
    let factory = PickyFactory::new(&["2025-06-18"]);
    let router = router_with(factory.clone(), CompatPolicy::disabled());

    let out = router.dispatch(Some("s"), call("tools/list")).await;

    assert!(factory.asked().is_empty());
    assert_eq!(out.response.unwrap().error.unwrap().code, CODE_NOT_INITIALIZED);
}

#[tokio::test]
async fn explicit_initialize_never_runs_compat() {
    let factory = PickyFactory::new(&["2025-06-18"]);
    let router = router_with(factory.clone(), compat_all());

    let out = router.dispatch(None, initialize("2025-06-18")).await;
    let sid = out.session_id.unwrap();
    assert!(uuid::Uuid::parse_str(&sid).is_ok());
    assert_eq!(factory.asked(), vec!["2025-06-18"]);
    assert_eq!(router.stats().transports.compat_attempted, 0);

    // Reuse path: same transport, session counted.
    router.dispatch(Some(&sid), call("tools/list")).await;
    assert_eq!(router.stats().transports.total_opened, 1);
    assert_eq!(router.sessions().get_session(&sid).unwrap().request_count, 2);
}

#[tokio::test]
async fn missing_id_on_plain_call_mints_one() {
    let factory = PickyFactory::new(&["2025-06-18"]);
    let router = router_with(factory, compat_all());

    let out = router.dispatch(None, call("tools/list")).await;
    let sid = out.session_id.unwrap();
    assert!(router.transport(&sid).is_some());
    assert!(out.response.unwrap().error.is_none());
}

// ── Attach failures ─────────────────────────────────────────────────

#[tokio::test]
async fn unobtainable_transport_reports_the_minted_session() {
    let router = router_with(Arc::new(BrokenFactory), compat_all());

    let out = router.dispatch(None, call("tools/list")).await;

    assert_eq!(out.status, 400);
    let sid = out.session_id.clone().unwrap();
    let err = out.response.unwrap().error.unwrap();
    assert_eq!(err.code, CODE_NO_ACTIVE_TRANSPORT);
    let data = err.data.unwrap();
    assert_eq!(data["kind"], "no_active_transport");
    assert_eq!(data["sessionId"], sid.as_str());
    assert_eq!(router.live_transports(), 0);
    assert_eq!(router.stats().transports.total_opened, 0);
}

// ── Live counter ─────────────────────────────────────────────────────

#[tokio::test]
async fn live_counter_drops_once_per_transport() {
    let factory = PickyFactory::new(&["2025-06-18"]);
    let router = router_with(factory, compat_all());

    router.dispatch(Some("a"), initialize("2025-06-18")).await;
    router.dispatch(Some("b"), initialize("2025-06-18")).await;
    assert_eq!(router.live_transports(), 2);

    // Client-initiated close.
    let a = router.transport("a").unwrap();
    router.close_session("a").unwrap();
    assert_eq!(router.live_transports(), 1);
    assert!(!a.close());
    assert_eq!(router.live_transports(), 1);

    let err = router.close_session("a").unwrap_err();
    assert_eq!(err.code(), CODE_SESSION_NOT_FOUND);
    assert_eq!(router.live_transports(), 1);

    // Idle eviction.
    let later = chrono::Utc::now() + chrono::Duration::minutes(5);
    let evicted = router.sessions().sweep_at(later);
    assert_eq!(evicted.len(), 1);
    assert_eq!(router.live_transports(), 0);
    assert!(router.transport("b").is_none());
}

#[tokio::test]
async fn ping_touches_without_creating() {
    let factory = PickyFactory::new(&["2025-06-18"]);
    let router = router_with(factory, compat_all());

    let out = router.dispatch(Some("nobody"), call("ping")).await;
    assert_eq!(
        out.response.unwrap().into_result().unwrap(),
        json!({ "ok": true, "sessionId": "nobody" })
    );
    assert!(router.sessions().get_session("nobody").is_none());
    assert_eq!(router.live_transports(), 0);
}

// ── End to end with the built-in collaborators ───────────────────────

#[tokio::test]
async fn third_session_evicts_the_oldest_server() {
    let mut config = Config::default();
    config.servers.max_servers = 2;
    let state = build_app_state(Arc::new(config)).unwrap();

    let evicted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&evicted);
    state.servers.subscribe(Arc::new(move |e: &ServerEvent| {
        if let ServerEvent::Evicted { session_id } = e {
            sink.lock().push(session_id.clone());
        }
    }));

    for sid in ["A", "B", "C"] {
        let out = state.router.dispatch(Some(sid), initialize("2025-06-18")).await;
        assert_eq!(out.status, 200, "initialize {sid}");
    }

    assert_eq!(*evicted.lock(), vec!["A".to_string()]);
    let stats = state.router.stats();
    assert_eq!(stats.servers.active_servers, 2);
    assert_eq!(stats.transports.live, 2);
    assert!(state.router.transport("A").is_none());

    // The evicted session is still known; its next call is recovered
    // through the compat handshake and pushes B out.
    let out = state
        .router
        .dispatch(
            Some("A"),
            JsonRpcRequest::new(
                3,
                "tools/call",
                Some(json!({ "name": "echo", "arguments": { "hi": 1 } })),
            ),
        )
        .await;
    let result = out.response.unwrap().into_result().unwrap();
    assert_eq!(result["isError"], false);
    assert_eq!(*evicted.lock(), vec!["A".to_string(), "B".to_string()]);
    assert_eq!(state.router.stats().servers.active_servers, 2);
}
