//! Error types for the diagnostics loop
//!
//! Failures are grouped by where they come from so the orchestrator can decide
//! what to do with them. Only connectivity failures are ever retried; protocol,
//! tool and timeout failures end the run at the point they are detected.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DiagError {
    #[error("MCP endpoint unreachable: {0}")]
    Connectivity(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Tool '{tool}' reported an error: {message}")]
    ToolFailed { tool: String, message: String },
    #[error("Compilation did not settle within {0}s")]
    CompilationTimeout(u64),
    #[error("Test job '{job_id}' did not finish within {seconds}s")]
    JobTimeout { job_id: String, seconds: u64 },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl DiagError {
    /// Whether the orchestrator may start a fresh attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DiagError::Connectivity(_))
    }

    pub fn unrecognized_shape(context: &str) -> Self {
        DiagError::Protocol(format!("unrecognized response shape for {}", context))
    }
}

impl From<std::io::Error> for DiagError {
    fn from(err: std::io::Error) -> Self {
        DiagError::Io(err.to_string())
    }
}

impl From<reqwest::Error> for DiagError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            DiagError::Connectivity(err.to_string())
        } else {
            DiagError::Protocol(err.to_string())
        }
    }
}

impl From<serde_yaml::Error> for DiagError {
    fn from(err: serde_yaml::Error) -> Self {
        DiagError::Config(format!("Failed to parse YAML config: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connectivity_is_retryable() {
        assert!(DiagError::Connectivity("refused".into()).is_retryable());
        assert!(!DiagError::Protocol("bad body".into()).is_retryable());
        assert!(!DiagError::ToolFailed {
            tool: "read_console".into(),
            message: "boom".into()
        }
        .is_retryable());
        assert!(!DiagError::CompilationTimeout(900).is_retryable());
        assert!(!DiagError::JobTimeout {
            job_id: "j1".into(),
            seconds: 10
        }
        .is_retryable());
    }

    #[test]
    fn shape_error_names_context() {
        let err = DiagError::unrecognized_shape("get_test_job");
        assert!(err.to_string().contains("unrecognized response shape for get_test_job"));
    }
}
