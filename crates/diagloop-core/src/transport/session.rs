//! HTTP session transport for the MCP endpoint

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use super::framing::find_response;
use super::{RpcRequest, RpcResponse, RpcTransport};
use crate::config::EndpointConfig;
use crate::errors::DiagError;

pub const SESSION_HEADER: &str = "mcp-session-id";
const SESSION_QUERY: &str = "sessionId";
const BODY_EXCERPT_LEN: usize = 200;

/// One logical connection to the endpoint.
///
/// The session id is written once by [`SessionTransport::connect`] and never
/// changes afterwards; it is released together with the transport.
pub struct SessionTransport {
    base_url: String,
    client: reqwest::Client,
    session_id: Option<String>,
    next_id: AtomicU64,
    quiet_labels: HashSet<String>,
    protocol_version: String,
    client_name: String,
    client_version: String,
}

impl SessionTransport {
    pub fn new(config: &EndpointConfig) -> Result<Self, DiagError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DiagError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            client,
            session_id: None,
            next_id: AtomicU64::new(1),
            quiet_labels: config
                .quiet_tools
                .iter()
                .map(|tool| format!("tools/call:{}", tool))
                .collect(),
            protocol_version: config.protocol_version.clone(),
            client_name: config.client_name.clone(),
            client_version: config.client_version.clone(),
        })
    }

    /// Perform the handshake: obtain a session id, then `initialize` and
    /// `notifications/initialized`.
    pub async fn connect(&mut self) -> Result<(), DiagError> {
        if self.session_id.is_some() {
            return Err(DiagError::Protocol(
                "session already established for this transport".to_string(),
            ));
        }

        let response = self
            .client
            .get(&self.base_url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                DiagError::Connectivity(format!("handshake with {} failed: {}", self.base_url, e))
            })?;

        let status = response.status();
        let header_sid = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        log::info!("GET {} -> {}", self.base_url, status);

        let session_id = header_sid
            .filter(|sid| !sid.trim().is_empty())
            .or_else(|| session_id_from_body(&body))
            .ok_or_else(|| {
                DiagError::Connectivity(format!(
                    "no session id in handshake response from {} (status {})",
                    self.base_url, status
                ))
            })?;

        log::info!("🔗 MCP session established: {}", session_id);
        self.session_id = Some(session_id);

        let id = self.next_request_id();
        let server_info = self
            .send(
                "initialize",
                Some(json!({
                    "protocolVersion": self.protocol_version,
                    "capabilities": {},
                    "clientInfo": {"name": self.client_name, "version": self.client_version},
                })),
                Some(id),
            )
            .await?
            .ok_or_else(|| DiagError::Protocol("initialize returned no response".to_string()))?
            .into_result("initialize")?;
        log::debug!(
            "Initialized against {}",
            server_info["serverInfo"]["name"].as_str().unwrap_or("unknown server")
        );
        self.send("notifications/initialized", None, None).await?;
        Ok(())
    }

    fn is_quiet(&self, label: &str) -> bool {
        self.quiet_labels.contains(label)
    }
}

fn session_id_from_body(body: &str) -> Option<String> {
    serde_json::from_str::<Value>(body)
        .ok()?
        .get("sessionId")?
        .as_str()
        .filter(|sid| !sid.trim().is_empty())
        .map(str::to_string)
}

fn excerpt(body: &str) -> String {
    let mut cut = body.trim();
    if cut.len() > BODY_EXCERPT_LEN {
        let mut end = BODY_EXCERPT_LEN;
        while !cut.is_char_boundary(end) {
            end -= 1;
        }
        cut = &cut[..end];
    }
    cut.to_string()
}

#[async_trait]
impl RpcTransport for SessionTransport {
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        id: Option<u64>,
    ) -> Result<Option<RpcResponse>, DiagError> {
        let session_id = self.session_id.as_deref().ok_or_else(|| {
            DiagError::Protocol(format!("cannot send {} before the handshake", method))
        })?;
        let request = RpcRequest::new(method, params, id);
        let label = request.label();

        let response = self
            .client
            .post(&self.base_url)
            .query(&[(SESSION_QUERY, session_id)])
            .header(SESSION_HEADER, session_id)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json, text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                log::error!("{} request failed: {}", label, e);
                DiagError::from(e)
            })?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            log::error!("{} -> {}", label, status);
            return Err(DiagError::Protocol(format!(
                "{} returned HTTP {}: {}",
                label,
                status,
                excerpt(&body)
            )));
        }

        if self.is_quiet(&label) {
            log::debug!("{} -> {}", label, status);
        } else {
            log::info!("{} -> {}", label, status);
        }

        let Some(id) = request.id else {
            return Ok(None);
        };

        match find_response(&body, id) {
            Some(rpc) => Ok(Some(rpc)),
            None => {
                log::error!("{}: no response document with id {}", label, id);
                Err(DiagError::Protocol(format!(
                    "{}: no response matched request id {} (body: {})",
                    label,
                    id,
                    excerpt(&body)
                )))
            }
        }
    }

    fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}
