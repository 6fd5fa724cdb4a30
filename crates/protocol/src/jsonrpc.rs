//! JSON-RPC 2.0 envelope types, server side.
//!
//! Unlike a client, the gateway has to echo whatever `id` the caller picked
//! (number, string or absent), so ids are carried as raw JSON values.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sg_domain::error::Error;

use crate::JSONRPC_VERSION;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// An inbound JSON-RPC 2.0 request.  Without an `id` it is a notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Reject envelopes that are not JSON-RPC 2.0.
    pub fn validate(&self) -> Result<(), Error> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Err(Error::InvalidRequest(format!(
                "unsupported jsonrpc version {:?}",
                self.jsonrpc
            )));
        }
        if self.method.is_empty() {
            return Err(Error::InvalidRequest("method must not be empty".into()));
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Responses
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(error),
        }
    }

    /// Build a response from a handler outcome.
    pub fn from_result(id: Option<Value>, result: Result<Value, Error>) -> Self {
        match result {
            Ok(v) => Self::success(id, v),
            Err(e) => Self::failure(id, JsonRpcError::from(&e)),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        if let Some(err) = self.error {
            Err(err)
        } else {
            Ok(self.result.unwrap_or(Value::Null))
        }
    }
}

/// A JSON-RPC 2.0 error object.
///
/// `data` carries the machine-readable `kind` tag and, when the error
/// names one, the `sessionId` the client should retry with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

impl From<&Error> for JsonRpcError {
    fn from(err: &Error) -> Self {
        let mut data = json!({ "kind": err.kind() });
        if let Some(sid) = err.session_id() {
            data["sessionId"] = Value::String(sid.to_owned());
        }
        Self {
            code: err.code(),
            message: err.to_string(),
            data: Some(data),
        }
    }
}

impl From<Error> for JsonRpcError {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_domain::error::{CODE_NO_ACTIVE_TRANSPORT, CODE_POOL_EXHAUSTED};

    #[test]
    fn request_without_id_is_notification() {
        let raw = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        assert!(req.is_notification());
        assert!(req.params.is_none());
    }

    #[test]
    fn string_ids_are_echoed() {
        let raw = r#"{"jsonrpc":"2.0","id":"abc","method":"tools/list"}"#;
        let req: JsonRpcRequest = serde_json::from_str(raw).unwrap();
        let resp = JsonRpcResponse::success(req.id, json!({}));
        assert_eq!(resp.id, json!("abc"));
    }

    #[test]
    fn validate_rejects_wrong_version() {
        let req = JsonRpcRequest {
            jsonrpc: "1.0".into(),
            id: Some(json!(1)),
            method: "ping".into(),
            params: None,
        };
        let err = req.validate().unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[test]
    fn error_conversion_keeps_code_and_kind() {
        let err = Error::PoolExhausted {
            active: 2,
            queued: 1,
        };
        let rpc = JsonRpcError::from(&err);
        assert_eq!(rpc.code, CODE_POOL_EXHAUSTED);
        assert_eq!(rpc.data.unwrap()["kind"], "pool_exhausted");
    }

    #[test]
    fn no_active_transport_exposes_session_id() {
        let rpc = JsonRpcError::from(Error::NoActiveTransport {
            session_id: "s-1".into(),
        });
        assert_eq!(rpc.code, CODE_NO_ACTIVE_TRANSPORT);
        assert_eq!(rpc.data.unwrap()["sessionId"], "s-1");
    }

    #[test]
    fn failure_response_omits_result() {
        let resp = JsonRpcResponse::from_result(
            Some(json!(9)),
            Err(Error::MethodNotFound("nope".into())),
        );
        let text = serde_json::to_string(&resp).unwrap();
        assert!(!text.contains("\"result\""));
        assert_eq!(resp.into_result().unwrap_err().code, -32601);
    }

    #[test]
    fn jsonrpc_error_display() {
        let err = JsonRpcError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert_eq!(format!("{err}"), "JSON-RPC error -32601: Method not found");
    }
}
