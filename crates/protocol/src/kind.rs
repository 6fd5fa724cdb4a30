use serde_json::Value;
use sg_domain::error::Error;

use crate::jsonrpc::JsonRpcRequest;
use crate::mcp::InitializeParams;
use crate::{METHOD_INITIALIZE, METHOD_PING, METHOD_SESSION_CLOSE};

/// The closed set of request kinds the router distinguishes.
///
/// Only `initialize` carries a schema the gateway itself interprets;
/// everything else is a `Call` whose params belong to the session handler.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Initialize(InitializeParams),
    Ping,
    Close,
    Call { method: String, params: Value },
}

impl RequestKind {
    pub fn is_initialize(&self) -> bool {
        matches!(self, Self::Initialize(_))
    }

    pub fn method(&self) -> &str {
        match self {
            Self::Initialize(_) => METHOD_INITIALIZE,
            Self::Ping => METHOD_PING,
            Self::Close => METHOD_SESSION_CLOSE,
            Self::Call { method, .. } => method,
        }
    }
}

impl TryFrom<&JsonRpcRequest> for RequestKind {
    type Error = Error;

    fn try_from(req: &JsonRpcRequest) -> Result<Self, Self::Error> {
        req.validate()?;
        let kind = match req.method.as_str() {
            METHOD_INITIALIZE => {
                let params = req.params.clone().ok_or_else(|| {
                    Error::InvalidParams("initialize requires params".into())
                })?;
                let params: InitializeParams = serde_json::from_value(params)
                    .map_err(|e| Error::InvalidParams(format!("initialize: {e}")))?;
                Self::Initialize(params)
            }
            METHOD_PING => Self::Ping,
            METHOD_SESSION_CLOSE => Self::Close,
            other => Self::Call {
                method: other.to_owned(),
                params: req.params.clone().unwrap_or(Value::Null),
            },
        };
        Ok(kind)
    }
}
