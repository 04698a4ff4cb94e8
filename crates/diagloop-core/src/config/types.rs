//! Configuration type definitions for the diagnostics loop
//!
//! Every section is optional in YAML. Missing fields fall back to the values the
//! loop has always run with: three connection attempts two seconds apart, a
//! sixty second build quiet period and a two second poll interval.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::DiagError;

pub const DEFAULT_MCP_URL: &str = "http://localhost:8080/mcp";
pub const DEFAULT_CONFIG_FILE: &str = "diagloop.yaml";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiagConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub compilation: CompilationConfig,
    #[serde(default)]
    pub tests: TestsConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_client_version")]
    pub client_version: String,
    /// Tools whose successful calls are not logged, to keep long polls readable.
    #[serde(default = "default_quiet_tools")]
    pub quiet_tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_delay")]
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_refresh_compile")]
    pub compile: String,
    #[serde(default = "default_refresh_mode")]
    pub mode: String,
    #[serde(default = "default_refresh_scope")]
    pub scope: String,
    #[serde(default = "default_true")]
    pub wait_for_ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_console_count")]
    pub count: u32,
    #[serde(default = "default_console_format")]
    pub format: String,
    /// Each pattern is a list of substrings that must all appear in a message.
    #[serde(default = "default_benign_patterns")]
    pub benign_patterns: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedTree {
    pub dir: PathBuf,
    pub extension: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    #[serde(default = "default_sources")]
    pub sources: Vec<WatchedTree>,
    #[serde(default = "default_artifacts")]
    pub artifacts: Vec<WatchedTree>,
    #[serde(default = "default_stability_window")]
    pub stability_window_secs: u64,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_compile_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestsConfig {
    #[serde(default)]
    pub skip: bool,
    #[serde(default = "default_test_mode")]
    pub mode: String,
    #[serde(default = "default_true")]
    pub save_scene: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_job_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub color: ColorChoice,
}

fn default_url() -> String {
    DEFAULT_MCP_URL.to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_protocol_version() -> String {
    "2024-11-05".to_string()
}

fn default_client_name() -> String {
    "diagloop".to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_quiet_tools() -> Vec<String> {
    vec!["get_test_job".to_string()]
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

fn default_true() -> bool {
    true
}

fn default_refresh_compile() -> String {
    "request".to_string()
}

fn default_refresh_mode() -> String {
    "if_dirty".to_string()
}

fn default_refresh_scope() -> String {
    "all".to_string()
}

fn default_console_count() -> u32 {
    500
}

fn default_console_format() -> String {
    "json".to_string()
}

fn default_benign_patterns() -> Vec<Vec<String>> {
    [
        &["WebSocket", "Connection failed"][..],
        &["Undo after editor test run"][..],
        &["UnityConnectWebRequestException"][..],
        &["Saving results to"][..],
    ]
    .iter()
    .map(|parts| parts.iter().map(|p| p.to_string()).collect())
    .collect()
}

fn default_project_root() -> PathBuf {
    PathBuf::from("..")
}

fn default_sources() -> Vec<WatchedTree> {
    vec![WatchedTree {
        dir: PathBuf::from("Assets").join("Scripts"),
        extension: "cs".to_string(),
    }]
}

fn default_artifacts() -> Vec<WatchedTree> {
    vec![WatchedTree {
        dir: PathBuf::from("Library"),
        extension: "dll".to_string(),
    }]
}

fn default_stability_window() -> u64 {
    60
}

fn default_poll_interval() -> u64 {
    2
}

fn default_compile_timeout() -> u64 {
    900
}

fn default_test_mode() -> String {
    "EditMode".to_string()
}

fn default_job_timeout() -> u64 {
    1800
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            request_timeout_secs: default_request_timeout(),
            protocol_version: default_protocol_version(),
            client_name: default_client_name(),
            client_version: default_client_version(),
            quiet_tools: default_quiet_tools(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_retry_delay(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compile: default_refresh_compile(),
            mode: default_refresh_mode(),
            scope: default_refresh_scope(),
            wait_for_ready: true,
        }
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            count: default_console_count(),
            format: default_console_format(),
            benign_patterns: default_benign_patterns(),
        }
    }
}

impl Default for CompilationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            project_root: default_project_root(),
            sources: default_sources(),
            artifacts: default_artifacts(),
            stability_window_secs: default_stability_window(),
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_compile_timeout(),
        }
    }
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            skip: false,
            mode: default_test_mode(),
            save_scene: true,
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_job_timeout(),
        }
    }
}

impl EndpointConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl CompilationConfig {
    pub fn stability_window(&self) -> Duration {
        Duration::from_secs(self.stability_window_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl TestsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DiagConfig {
    pub fn validate(&self) -> Result<(), DiagError> {
        let url = self.endpoint.url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(DiagError::Config(format!(
                "endpoint.url must be an http(s) URL, got '{}'",
                self.endpoint.url
            )));
        }
        if self.endpoint.request_timeout_secs == 0 {
            return Err(DiagError::Config(
                "endpoint.request_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(DiagError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.compilation.poll_interval_secs == 0 || self.tests.poll_interval_secs == 0 {
            return Err(DiagError::Config("poll intervals must be > 0".to_string()));
        }
        if self.compilation.enabled && self.compilation.artifacts.is_empty() {
            return Err(DiagError::Config(
                "compilation.artifacts must list at least one directory".to_string(),
            ));
        }
        if self
            .console
            .benign_patterns
            .iter()
            .any(|pattern| pattern.is_empty() || pattern.iter().any(|p| p.is_empty()))
        {
            return Err(DiagError::Config(
                "console.benign_patterns entries must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}
