//! Wire protocol: JSON-RPC 2.0 envelopes, the closed set of request kinds
//! the gateway understands, and the MCP payloads its built-in handlers
//! speak.

pub mod jsonrpc;
pub mod kind;
pub mod mcp;

pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use kind::RequestKind;
pub use mcp::{ClientInfo, InitializeParams, InitializeResult, ServerInfo};

/// HTTP header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "mcp-session-id";

pub const JSONRPC_VERSION: &str = "2.0";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_PING: &str = "ping";
pub const METHOD_SESSION_CLOSE: &str = "session/close";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";
