use serde::Serialize;

/// Structured trace events emitted across all SessionGate crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_id: String,
        live_sessions: usize,
    },
    SessionEvicted {
        session_id: String,
        reason: String,
        idle_ms: i64,
        request_count: u64,
    },
    ServerCreated {
        session_id: String,
        active_servers: usize,
    },
    ServerEvicted {
        session_id: String,
        request_count: u64,
    },
    TransportOpened {
        session_id: String,
        live_transports: usize,
        compat_init: bool,
    },
    TransportClosed {
        session_id: String,
        live_transports: usize,
    },
    CompatInit {
        session_id: String,
        attempts: usize,
        accepted_version: Option<String>,
    },
    PoolRejected {
        session_id: Option<String>,
        method: String,
        active: usize,
        queued: usize,
    },
    RequestTimedOut {
        request_id: u64,
        session_id: Option<String>,
        method: String,
        timeout_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sg_event");
    }
}
