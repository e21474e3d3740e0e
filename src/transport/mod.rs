//! # MCP HTTP Transport Layer
//!
//! This module implements the HTTP transport layer for the Model Context
//! Protocol (MCP). It multiplexes JSON-RPC 2.0 message exchanges between MCP
//! clients and an MCP application backend over HTTP, speaking two wire
//! protocols on the same listener:
//!
//! - the legacy Server-Sent Events (SSE) transport (`GET /sse` +
//!   `POST /messages/`), and
//! - the newer Streamable HTTP transport (`/mcp` with an `Mcp-Session-Id`
//!   header).
//!
//! The transport layer:
//! - Handles serialization and deserialization of messages
//! - Tracks per-client sessions across HTTP round-trips and long-lived streams
//! - Correlates asynchronous backend responses with the request that is still
//!   holding its HTTP socket open
//!
//! Method dispatch (tools, resources, prompts) is deliberately not part of
//! this layer; the backend consumes raw JSON-RPC objects through the event
//! channels exposed by the server and client adapters.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::ErrorCode;

mod client;
pub use client::*;

mod server;
pub use server::*;

/// Request/response header carrying the Streamable HTTP session id.
pub const MCP_SESSION_ID_HEADER: &str = "Mcp-Session-Id";

/// Response header advertising Streamable HTTP support on `HEAD /mcp`.
pub const MCP_ENDPOINT_AVAILABLE_HEADER: &str = "Mcp-Endpoint-Available";

/// The JSON-RPC protocol version tag, "2.0" everywhere in practice.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct JsonRpcVersion(String);

impl Default for JsonRpcVersion {
    fn default() -> Self {
        JsonRpcVersion("2.0".to_owned())
    }
}

impl JsonRpcVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A typed JSON-RPC request.
///
/// The adapters shuttle application traffic as raw objects; this type exists
/// for the few messages the transport originates itself, such as the
/// client's protocol probe.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct JsonRpcRequest {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    pub jsonrpc: JsonRpcVersion,
}

/// A JSON-RPC error object, as embedded under `error` in rejection bodies.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Returns `true` if the raw object is a JSON-RPC request (carries an `id`),
/// `false` if it is a notification.
///
/// The transport never inspects messages beyond this: requests hold their
/// HTTP socket open for the backend's answer, notifications are acknowledged
/// immediately.
pub fn is_request(object: &Value) -> bool {
    object.get("id").is_some()
}

/// Builds a bare JSON-RPC error body, `{"jsonrpc":"2.0","error":{...}}`.
///
/// Used for transport-level rejections where no request id is available to
/// echo.
pub fn error_body(code: ErrorCode, message: impl Into<String>, data: Option<Value>) -> Value {
    json!({
        "jsonrpc": JsonRpcVersion::default(),
        "error": JsonRpcError {
            code: code as i32,
            message: message.into(),
            data,
        },
    })
}
