// src/test_utils/scripted_transport.rs
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::errors::DiagError;
use crate::transport::{RpcResponse, RpcTransport};

enum Scripted {
    Result(Value),
    Failure(DiagError),
}

/// In-memory transport answering `tools/call` requests from per-tool scripts.
///
/// Scripted responses are consumed in order; the last one for a tool keeps
/// being returned once the rest are used up.
pub struct ScriptedTransport {
    next_id: AtomicU64,
    session_id: String,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    calls: Mutex<Vec<(String, Value)>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            session_id: "scripted-session".to_string(),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn push(self, tool: &str, scripted: Scripted) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(tool.to_string())
            .or_default()
            .push_back(scripted);
        self
    }

    /// Raw `tools/call` result object.
    pub fn with_result(self, tool: &str, result: Value) -> Self {
        self.push(tool, Scripted::Result(result))
    }

    pub fn with_text(self, tool: &str, text: &str) -> Self {
        self.with_result(tool, json!({"content": [{"type": "text", "text": text}]}))
    }

    /// A payload serialised as JSON inside the first text item.
    pub fn with_json(self, tool: &str, payload: Value) -> Self {
        let text = payload.to_string();
        self.with_text(tool, &text)
    }

    pub fn with_failure(self, tool: &str, error: DiagError) -> Self {
        self.push(tool, Scripted::Failure(error))
    }

    /// Every `(tool, arguments)` pair received, in order.
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, tool: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == tool)
            .count()
    }
}

#[async_trait]
impl RpcTransport for ScriptedTransport {
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        id: Option<u64>,
    ) -> Result<Option<RpcResponse>, DiagError> {
        let Some(id) = id else {
            return Ok(None);
        };
        if method != "tools/call" {
            return Ok(Some(RpcResponse {
                id: Some(json!(id)),
                result: Some(json!({})),
                error: None,
            }));
        }

        let params = params.unwrap_or(Value::Null);
        let tool = params["name"].as_str().unwrap_or_default().to_string();
        self.calls
            .lock()
            .unwrap()
            .push((tool.clone(), params["arguments"].clone()));

        let mut scripts = self.scripts.lock().unwrap();
        let queue = scripts
            .get_mut(&tool)
            .ok_or_else(|| DiagError::Protocol(format!("no script for tool {}", tool)))?;
        let scripted = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().map(|s| match s {
                Scripted::Result(v) => Scripted::Result(v.clone()),
                Scripted::Failure(e) => Scripted::Failure(e.clone()),
            })
        };

        match scripted {
            Some(Scripted::Result(result)) => Ok(Some(RpcResponse {
                id: Some(json!(id)),
                result: Some(result),
                error: None,
            })),
            Some(Scripted::Failure(error)) => Err(error),
            None => Err(DiagError::Protocol(format!("script for {} is empty", tool))),
        }
    }

    fn session_id(&self) -> Option<&str> {
        Some(&self.session_id)
    }
}
