// src/test_utils/mock_mcp_server.rs
use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

/// How the mock hands out its session id during the handshake.
#[derive(Debug, Clone)]
pub enum SessionMode {
    Header(String),
    Body(String),
    Missing,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub tool: Option<String>,
    pub session_header: Option<String>,
}

#[derive(Clone)]
struct MockServerState {
    mode: SessionMode,
    /// Scripted `tools/call` results keyed by tool name. The last result for a
    /// tool is repeated once the others are consumed.
    tool_results: Arc<Mutex<Vec<(String, Value)>>>,
    reject_initialize: bool,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

async fn handshake_handler(State(state): State<MockServerState>) -> Response {
    match &state.mode {
        SessionMode::Header(sid) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                "mcp-session-id",
                HeaderValue::from_str(sid).unwrap_or(HeaderValue::from_static("invalid")),
            );
            (StatusCode::OK, headers, Json(json!({}))).into_response()
        }
        SessionMode::Body(sid) => (StatusCode::OK, Json(json!({ "sessionId": sid }))).into_response(),
        SessionMode::Missing => (StatusCode::OK, Json(json!({"status": "ok"}))).into_response(),
    }
}

fn next_tool_result(state: &MockServerState, tool: &str) -> Value {
    let mut results = state.tool_results.lock().unwrap();
    let matching: Vec<usize> = results
        .iter()
        .enumerate()
        .filter(|(_, (name, _))| name == tool)
        .map(|(i, _)| i)
        .collect();
    match matching.as_slice() {
        [] => json!({"content": [], "isError": true}),
        [only] => results[*only].1.clone(),
        [first, ..] => results.remove(*first).1,
    }
}

async fn rpc_handler(
    State(state): State<MockServerState>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Response {
    let method = payload["method"].as_str().unwrap_or_default().to_string();
    let tool = payload["params"]["name"].as_str().map(str::to_string);
    log::debug!("Mock MCP server received {} ({:?})", method, tool);
    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.clone(),
        tool: tool.clone(),
        session_header: headers
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    });

    let Some(id) = payload.get("id").cloned() else {
        return StatusCode::ACCEPTED.into_response();
    };

    if method == "initialize" && state.reject_initialize {
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": -32602, "message": "Unsupported protocol version"}
        });
        return (StatusCode::OK, Json(body)).into_response();
    }

    let result = match (method.as_str(), tool.as_deref()) {
        ("initialize", _) => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "mock-mcp", "version": "0.0.0"}
        }),
        ("tools/call", Some(tool)) => next_tool_result(&state, tool),
        _ => json!({}),
    };

    let body = format!(
        "event: message\ndata: {}\n\ndata: {}\n\n",
        json!({"jsonrpc": "2.0", "method": "notifications/message", "params": {"level": "info"}}),
        json!({"jsonrpc": "2.0", "id": id, "result": result})
    );
    (
        StatusCode::OK,
        [("content-type", "text/event-stream")],
        body,
    )
        .into_response()
}

pub struct MockMcpServer {
    addr: SocketAddr,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    pub recorded_requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockMcpServer {
    pub async fn start(mode: SessionMode, tool_results: Vec<(String, Value)>) -> Self {
        Self::launch(mode, tool_results, false).await
    }

    /// A server that answers `initialize` with a JSON-RPC error.
    pub async fn start_rejecting_initialize(mode: SessionMode) -> Self {
        Self::launch(mode, Vec::new(), true).await
    }

    async fn launch(
        mode: SessionMode,
        tool_results: Vec<(String, Value)>,
        reject_initialize: bool,
    ) -> Self {
        let state = MockServerState {
            mode,
            tool_results: Arc::new(Mutex::new(tool_results)),
            reject_initialize,
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let recorded_requests = state.requests.clone();

        let app = Router::new()
            .route("/mcp", get(handshake_handler).post(rpc_handler))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap_or_else(|e| {
            panic!("Failed to bind mock server to 127.0.0.1:0. Error: {}", e);
        });
        let addr = listener.local_addr().unwrap();
        log::info!("Mock MCP server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap_or_else(|e| {
                    log::error!("Mock MCP server error: {}", e);
                });
        });

        MockMcpServer {
            addr,
            shutdown_tx,
            recorded_requests,
        }
    }

    pub fn address(&self) -> String {
        format!("http://{}/mcp", self.addr)
    }

    pub fn recorded_methods(&self) -> Vec<String> {
        self.recorded_requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.method.clone())
            .collect()
    }

    pub fn recorded_session_ids(&self) -> Vec<String> {
        self.recorded_requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.session_header.clone())
            .collect()
    }

    pub fn recorded_tools(&self) -> Vec<String> {
        self.recorded_requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.tool.clone())
            .collect()
    }

    pub async fn shutdown(self) {
        if self.shutdown_tx.send(()).is_err() {
            log::warn!("Mock MCP server shutdown signal already sent or receiver dropped.");
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
