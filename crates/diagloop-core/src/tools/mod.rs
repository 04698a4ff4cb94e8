//! Typed access to the editor's remote tools
//!
//! [`ToolInvoker`] issues `tools/call` requests through any [`RpcTransport`],
//! unwraps the content envelope and decodes the first text item into a
//! [`ToolPayload`]. A payload that fails to decode comes back as raw text and is
//! never treated as a transport failure.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::errors::DiagError;
use crate::transport::RpcTransport;

pub mod literal;
pub mod payload;

pub use payload::{unwrap_data, ContentItem, ToolCallResult, ToolPayload};

pub const READ_CONSOLE: &str = "read_console";
pub const MANAGE_SCENE: &str = "manage_scene";
pub const RUN_TESTS_ASYNC: &str = "run_tests_async";
pub const GET_TEST_JOB: &str = "get_test_job";
pub const REFRESH_UNITY: &str = "refresh_unity";

/// Arguments for the `refresh_unity` rebuild trigger.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub compile: String,
    pub mode: String,
    pub scope: String,
    pub wait_for_ready: bool,
}

#[derive(Clone)]
pub struct ToolInvoker {
    transport: Arc<dyn RpcTransport>,
}

impl ToolInvoker {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.transport.session_id()
    }

    pub async fn call_tool(&self, name: &str, args: Value) -> Result<ToolPayload, DiagError> {
        let id = self.transport.next_request_id();
        let response = self
            .transport
            .send(
                "tools/call",
                Some(json!({"name": name, "arguments": args})),
                Some(id),
            )
            .await?
            .ok_or_else(|| DiagError::Protocol(format!("{}: no response received", name)))?;

        let raw = response.into_result(name)?;
        let result: ToolCallResult = serde_json::from_value(raw).map_err(|e| {
            DiagError::Protocol(format!("{}: malformed tool result envelope: {}", name, e))
        })?;

        if result.is_error {
            let message = result
                .first_text()
                .unwrap_or("tool reported an error without details")
                .to_string();
            log::error!("Tool {} reported an error: {}", name, message);
            return Err(DiagError::ToolFailed {
                tool: name.to_string(),
                message,
            });
        }

        let payload = ToolPayload::from_result(&result);
        if let ToolPayload::Text(_) = payload {
            log::debug!("Tool {} returned unstructured text", name);
        }
        Ok(payload)
    }

    pub async fn read_console(&self, count: u32, format: &str) -> Result<ToolPayload, DiagError> {
        self.call_tool(
            READ_CONSOLE,
            json!({"count": count.to_string(), "format": format}),
        )
        .await
    }

    pub async fn save_scene(&self) -> Result<ToolPayload, DiagError> {
        self.call_tool(MANAGE_SCENE, json!({"action": "save"})).await
    }

    pub async fn run_tests_async(&self, mode: &str) -> Result<ToolPayload, DiagError> {
        self.call_tool(RUN_TESTS_ASYNC, json!({"mode": mode})).await
    }

    pub async fn get_test_job(&self, job_id: &str) -> Result<ToolPayload, DiagError> {
        self.call_tool(GET_TEST_JOB, json!({"job_id": job_id})).await
    }

    pub async fn refresh(&self, request: &RefreshRequest) -> Result<ToolPayload, DiagError> {
        self.call_tool(
            REFRESH_UNITY,
            json!({
                "compile": request.compile,
                "mode": request.mode,
                "scope": request.scope,
                "wait_for_ready": request.wait_for_ready,
            }),
        )
        .await
    }
}
