/// Shared error type used across all SessionGate crates.
///
/// Every variant maps to a stable JSON-RPC error code and a short `kind` tag
/// so capacity and timeout failures always reach the client structurally.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("connection pool exhausted ({active} active, {queued} queued)")]
    PoolExhausted { active: usize, queued: usize },

    #[error("request {request_id} timed out after {timeout_ms}ms")]
    RequestTimeout { request_id: u64, timeout_ms: u64 },

    #[error("worker execution failed: {0}")]
    WorkerExecution(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("no active transport for session {session_id}")]
    NoActiveTransport { session_id: String },

    #[error(
        "unsupported protocol version {requested} (supported: {})",
        .supported.join(", ")
    )]
    ProtocolVersionMismatch {
        requested: String,
        supported: Vec<String>,
    },

    #[error("session {0} is not initialized")]
    NotInitialized(String),

    #[error("transport closed for session {0}")]
    TransportClosed(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("handler creation failed: {0}")]
    HandlerCreation(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// ── JSON-RPC error codes ────────────────────────────────────────────

pub const CODE_POOL_EXHAUSTED: i64 = -32001;
pub const CODE_REQUEST_TIMEOUT: i64 = -32002;
pub const CODE_WORKER_EXECUTION: i64 = -32003;
pub const CODE_SESSION_NOT_FOUND: i64 = -32004;
pub const CODE_NO_ACTIVE_TRANSPORT: i64 = -32005;
pub const CODE_PROTOCOL_VERSION_MISMATCH: i64 = -32006;
pub const CODE_NOT_INITIALIZED: i64 = -32007;
pub const CODE_TRANSPORT_CLOSED: i64 = -32008;
pub const CODE_CANCELLED: i64 = -32009;
pub const CODE_HANDLER_CREATION: i64 = -32010;
pub const CODE_INVALID_REQUEST: i64 = -32600;
pub const CODE_METHOD_NOT_FOUND: i64 = -32601;
pub const CODE_INVALID_PARAMS: i64 = -32602;
pub const CODE_INTERNAL: i64 = -32603;

impl Error {
    /// JSON-RPC error code reported to clients.
    pub fn code(&self) -> i64 {
        match self {
            Self::PoolExhausted { .. } => CODE_POOL_EXHAUSTED,
            Self::RequestTimeout { .. } => CODE_REQUEST_TIMEOUT,
            Self::WorkerExecution(_) => CODE_WORKER_EXECUTION,
            Self::SessionNotFound(_) => CODE_SESSION_NOT_FOUND,
            Self::NoActiveTransport { .. } => CODE_NO_ACTIVE_TRANSPORT,
            Self::ProtocolVersionMismatch { .. } => CODE_PROTOCOL_VERSION_MISMATCH,
            Self::NotInitialized(_) => CODE_NOT_INITIALIZED,
            Self::TransportClosed(_) => CODE_TRANSPORT_CLOSED,
            Self::Cancelled(_) => CODE_CANCELLED,
            Self::HandlerCreation(_) => CODE_HANDLER_CREATION,
            Self::MethodNotFound(_) => CODE_METHOD_NOT_FOUND,
            Self::InvalidParams(_) => CODE_INVALID_PARAMS,
            Self::InvalidRequest(_) => CODE_INVALID_REQUEST,
            Self::Json(_) | Self::Other(_) => CODE_INTERNAL,
        }
    }

    /// Short machine-readable tag (`"pool_exhausted"`, `"request_timeout"`, …).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PoolExhausted { .. } => "pool_exhausted",
            Self::RequestTimeout { .. } => "request_timeout",
            Self::WorkerExecution(_) => "worker_execution_error",
            Self::SessionNotFound(_) => "session_not_found",
            Self::NoActiveTransport { .. } => "no_active_transport",
            Self::ProtocolVersionMismatch { .. } => "protocol_version_mismatch",
            Self::NotInitialized(_) => "not_initialized",
            Self::TransportClosed(_) => "transport_closed",
            Self::Cancelled(_) => "cancelled",
            Self::HandlerCreation(_) => "handler_creation_failed",
            Self::MethodNotFound(_) => "method_not_found",
            Self::InvalidParams(_) => "invalid_params",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Json(_) => "json",
            Self::Other(_) => "internal",
        }
    }

    /// HTTP status the gateway answers with when this error ends a request.
    ///
    /// Protocol-level failures stay `200` and travel in the JSON-RPC body.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::PoolExhausted { .. } => 503,
            Self::RequestTimeout { .. } => 504,
            Self::SessionNotFound(_) => 404,
            Self::NoActiveTransport { .. } | Self::InvalidRequest(_) => 400,
            Self::HandlerCreation(_) | Self::Json(_) | Self::Other(_) => 500,
            _ => 200,
        }
    }

    /// Session id the client should retry with, when the error carries one.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::NoActiveTransport { session_id } => Some(session_id),
            Self::SessionNotFound(id) | Self::NotInitialized(id) | Self::TransportClosed(id) => {
                Some(id)
            }
            _ => None,
        }
    }
}
