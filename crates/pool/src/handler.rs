use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use sg_domain::error::Result;
use sg_protocol::{InitializeParams, InitializeResult};

/// Session-scoped protocol logic (tool registry, business dispatch).
#[async_trait]
pub trait ProtocolHandler: Send + Sync {
    /// Protocol versions this handler can speak, newest first.
    fn supported_protocol_versions(&self) -> &[String];

    fn accepts_protocol_version(&self, version: &str) -> bool {
        self.supported_protocol_versions()
            .iter()
            .any(|v| v == version)
    }

    /// Answer an `initialize` whose version was already accepted.
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult>;

    /// Handle any request or notification after initialization.
    async fn handle(&self, method: &str, params: Value) -> Result<Value>;

    /// Release whatever the handler holds.  Called once when its pooled
    /// handle is evicted or removed.
    fn shutdown(&self) {}
}

/// Builds one [`ProtocolHandler`] per session.
pub trait HandlerFactory: Send + Sync {
    fn create(&self, session_id: &str) -> Result<Arc<dyn ProtocolHandler>>;
}
