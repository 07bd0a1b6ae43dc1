//! JSON-RPC 2.0 framing for the child's stdio.
//!
//! One JSON object per line, UTF-8, no BOM. Requests carry an integer `id`;
//! notifications omit it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound request.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// Outbound notification (no id, no reply expected).
#[derive(Debug, Clone, Serialize)]
pub struct RpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl RpcNotification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// Error object in a response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Inbound response, matched to a request by `id`.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

/// Inbound notification (server-initiated, no id).
#[derive(Debug, Deserialize)]
pub struct IncomingNotification {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A decoded inbound frame.
#[derive(Debug)]
pub enum Incoming {
    Response(RpcResponse),
    Notification(IncomingNotification),
}

/// Decode one line from the child's stdout.
pub fn decode_line(line: &str) -> Result<Incoming, serde_json::Error> {
    let value: Value = serde_json::from_str(line)?;
    if value.get("id").map(|id| !id.is_null()).unwrap_or(false) {
        Ok(Incoming::Response(serde_json::from_value(value)?))
    } else {
        Ok(Incoming::Notification(serde_json::from_value(value)?))
    }
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
