//! JSON-RPC transport to the editor's MCP endpoint
//!
//! The [`RpcTransport`] trait is the seam every higher layer talks through. The
//! HTTP implementation lives in [`session`]; [`framing`] turns hybrid
//! JSON/event-stream response bodies into individual documents.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::DiagError;

pub mod framing;
pub mod session;

pub use session::SessionTransport;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Notifications carry no id and expect no reply.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

impl RpcRequest {
    pub fn new(method: &str, params: Option<Value>, id: Option<u64>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
            id,
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// Label used in request logs. Tool calls are labelled with the tool name.
    pub fn label(&self) -> String {
        if self.method == "tools/call" {
            if let Some(name) = self
                .params
                .as_ref()
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
            {
                return format!("tools/call:{}", name);
            }
        }
        self.method.clone()
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RpcResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    /// Unwrap the `result` member, turning a JSON-RPC error into a protocol error.
    pub fn into_result(self, method: &str) -> Result<Value, DiagError> {
        if let Some(error) = self.error {
            return Err(DiagError::Protocol(format!(
                "{} failed with JSON-RPC error {}: {}",
                method, error.code, error.message
            )));
        }
        self.result.ok_or_else(|| {
            DiagError::Protocol(format!("{} response carried neither result nor error", method))
        })
    }
}

#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Allocate a request id unique within this transport.
    fn next_request_id(&self) -> u64;

    /// Send one request. Returns `None` for notifications.
    async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        id: Option<u64>,
    ) -> Result<Option<RpcResponse>, DiagError>;

    fn session_id(&self) -> Option<&str>;
}
