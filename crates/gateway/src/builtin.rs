//! Built-in collaborators so the gateway runs standalone: a small
//! operation executor and a handler factory whose handlers expose those
//! operations as MCP tools routed through the connection pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use sg_domain::error::{Error, Result};
use sg_pool::{ConnectionPool, HandlerFactory, Operation, OperationExecutor, ProtocolHandler};
use sg_protocol::mcp::{ToolCallParams, ToolCallResult, ToolDef};
use sg_protocol::{InitializeParams, InitializeResult, ServerInfo};
use sg_protocol::{METHOD_TOOLS_CALL, METHOD_TOOLS_LIST};
use sg_sessions::SessionManager;

const MAX_SLEEP_MS: u64 = 60_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BuiltinExecutor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Executes `echo`, `sleep` and `session.info` on pool workers.
pub struct BuiltinExecutor {
    sessions: Option<Arc<SessionManager>>,
}

impl BuiltinExecutor {
    pub fn new(sessions: Option<Arc<SessionManager>>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl OperationExecutor for BuiltinExecutor {
    async fn execute(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        match method {
            "echo" => Ok(params),
            "sleep" => {
                let ms = params
                    .get("ms")
                    .and_then(Value::as_u64)
                    .unwrap_or(0)
                    .min(MAX_SLEEP_MS);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(json!({ "sleptMs": ms }))
            }
            "session.info" => {
                let sid = session_id
                    .ok_or_else(|| Error::InvalidParams("session.info needs a session".into()))?;
                let session = self
                    .sessions
                    .as_ref()
                    .and_then(|s| s.get_session(sid))
                    .ok_or_else(|| Error::SessionNotFound(sid.to_owned()))?;
                Ok(serde_json::to_value(session)?)
            }
            other => Err(Error::MethodNotFound(other.to_owned())),
        }
    }
}

/// Tool definitions backed by [`BuiltinExecutor`].
pub fn builtin_tools() -> Vec<ToolDef> {
    vec![
        ToolDef {
            name: "echo".into(),
            description: "Return the arguments unchanged.".into(),
            input_schema: json!({ "type": "object", "additionalProperties": true }),
        },
        ToolDef {
            name: "sleep".into(),
            description: "Occupy a worker for `ms` milliseconds.".into(),
            input_schema: json!({
                "type": "object",
                "properties": { "ms": { "type": "integer", "minimum": 0 } },
                "required": ["ms"]
            }),
        },
        ToolDef {
            name: "session.info".into(),
            description: "Describe the calling session.".into(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PooledHandler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Builds one [`PooledHandler`] per session.
pub struct PooledHandlerFactory {
    pool: Arc<ConnectionPool>,
    versions: Vec<String>,
}

impl PooledHandlerFactory {
    pub fn new(pool: Arc<ConnectionPool>, versions: Vec<String>) -> Self {
        Self { pool, versions }
    }
}

impl HandlerFactory for PooledHandlerFactory {
    fn create(&self, session_id: &str) -> Result<Arc<dyn ProtocolHandler>> {
        if self.versions.is_empty() {
            return Err(Error::HandlerCreation(
                "no accepted protocol versions configured".into(),
            ));
        }
        Ok(Arc::new(PooledHandler {
            session_id: session_id.to_owned(),
            pool: Arc::clone(&self.pool),
            versions: self.versions.clone(),
            tools: builtin_tools(),
        }))
    }
}

/// Session-scoped MCP handler.  Tool calls go through the connection pool.
pub struct PooledHandler {
    session_id: String,
    pool: Arc<ConnectionPool>,
    versions: Vec<String>,
    tools: Vec<ToolDef>,
}

impl PooledHandler {
    async fn call_tool(&self, params: Value) -> Result<Value> {
        let call: ToolCallParams = serde_json::from_value(params)
            .map_err(|e| Error::InvalidParams(format!("tools/call: {e}")))?;
        if !self.tools.iter().any(|t| t.name == call.name) {
            return Err(Error::InvalidParams(format!("unknown tool: {}", call.name)));
        }

        let op = Operation::new(call.name, call.arguments).for_session(self.session_id.as_str());
        let result = match self.pool.submit(op).await {
            Ok(value) => ToolCallResult::text(value.to_string(), false),
            Err(Error::WorkerExecution(msg)) => ToolCallResult::text(msg, true),
            Err(e) => return Err(e),
        };
        Ok(serde_json::to_value(result)?)
    }
}

#[async_trait]
impl ProtocolHandler for PooledHandler {
    fn supported_protocol_versions(&self) -> &[String] {
        &self.versions
    }

    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        tracing::debug!(
            session_id = %self.session_id,
            protocol_version = %params.protocol_version,
            client = params.client_info.as_ref().map(|c| c.name.as_str()).unwrap_or("unknown"),
            "initialize"
        );
        Ok(InitializeResult {
            protocol_version: params.protocol_version,
            capabilities: json!({ "tools": {} }),
            server_info: ServerInfo {
                name: "sessiongate".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        })
    }

    async fn handle(&self, method: &str, params: Value) -> Result<Value> {
        match method {
            METHOD_TOOLS_LIST => Ok(json!({ "tools": self.tools })),
            METHOD_TOOLS_CALL => self.call_tool(params).await,
            m if m.starts_with("notifications/") => Ok(Value::Null),
            other => Err(Error::MethodNotFound(other.to_owned())),
        }
    }

    fn shutdown(&self) {
        let cancelled = self.pool.cancel_session(&self.session_id);
        tracing::debug!(session_id = %self.session_id, cancelled, "handler shut down");
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
