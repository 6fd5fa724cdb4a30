use async_trait::async_trait;
use serde_json::Value;

use sg_domain::error::Result;

/// One unit of delegated work.
#[derive(Debug, Clone)]
pub struct Operation {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

impl Operation {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            session_id: None,
        }
    }

    pub fn for_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// The business operation a session ultimately invokes.
///
/// Runs on a pool worker.  An `Err` or a panic is reported to the caller
/// as a worker execution error carrying the original message.
#[async_trait]
pub trait OperationExecutor: Send + Sync + 'static {
    async fn execute(&self, method: &str, params: Value, session_id: Option<&str>)
        -> Result<Value>;
}
