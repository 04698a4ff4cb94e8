//! Console log audit
//!
//! Partitions editor console entries into errors, warnings and logs. Entries
//! with error severity whose message matches a known benign pattern (socket
//! teardown noise, test-runner cleanup chatter) are dropped from the error
//! bucket; warnings and logs are bucketed by severity alone.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;

use crate::errors::DiagError;
use crate::tools::ToolPayload;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Severity {
    Log,
    Warning,
    Error,
    Exception,
    Assert,
    Other(String),
}

impl Severity {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "log" | "info" => Severity::Log,
            "warning" | "warn" => Severity::Warning,
            "error" => Severity::Error,
            "exception" => Severity::Exception,
            "assert" => Severity::Assert,
            _ => Severity::Other(raw.trim().to_string()),
        }
    }

    pub fn is_error_like(&self) -> bool {
        matches!(self, Severity::Error | Severity::Exception | Severity::Assert)
    }

    pub fn label(&self) -> String {
        match self {
            Severity::Log => "LOG".to_string(),
            Severity::Warning => "WARNING".to_string(),
            Severity::Error => "ERROR".to_string(),
            Severity::Exception => "EXCEPTION".to_string(),
            Severity::Assert => "ASSERT".to_string(),
            Severity::Other(raw) => raw.to_ascii_uppercase(),
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Log
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        Ok(Severity::parse(&raw))
    }
}

fn lenient_line<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LogEntry {
    #[serde(rename = "type", default)]
    pub severity: Severity,
    #[serde(default, deserialize_with = "lenient_string")]
    pub message: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub file: String,
    #[serde(default, deserialize_with = "lenient_line")]
    pub line: Option<u64>,
    #[serde(default, rename = "stackTrace", alias = "stack_trace", deserialize_with = "lenient_string")]
    pub stack_trace: String,
}

impl LogEntry {
    pub fn new(severity: Severity, message: &str) -> Self {
        Self {
            severity,
            message: message.to_string(),
            file: String::new(),
            line: None,
            stack_trace: String::new(),
        }
    }

    pub fn location(&self) -> Option<String> {
        if self.file.is_empty() {
            None
        } else {
            Some(format!("{}:{}", self.file, self.line.unwrap_or(0)))
        }
    }
}

/// The known shapes a `read_console` payload comes in, tried in order.
#[derive(Deserialize)]
#[serde(untagged)]
enum ConsoleShape {
    Data { data: Vec<LogEntry> },
    Entries { entries: Vec<LogEntry> },
    NestedData { data: NestedEntries },
    Bare(Vec<LogEntry>),
}

#[derive(Deserialize)]
struct NestedEntries {
    entries: Vec<LogEntry>,
}

/// Decode console entries from a `read_console` payload.
pub fn decode_entries(payload: ToolPayload) -> Result<Vec<LogEntry>, DiagError> {
    let value = payload.into_structured("read_console")?;
    match serde_json::from_value::<ConsoleShape>(value) {
        Ok(ConsoleShape::Data { data }) => Ok(data),
        Ok(ConsoleShape::Entries { entries }) => Ok(entries),
        Ok(ConsoleShape::NestedData { data }) => Ok(data.entries),
        Ok(ConsoleShape::Bare(entries)) => Ok(entries),
        Err(_) => Err(DiagError::unrecognized_shape("read_console")),
    }
}

/// A set of substrings that must all occur in a message for it to be benign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenignPattern {
    parts: Vec<String>,
}

impl BenignPattern {
    pub fn new<S: Into<String>>(parts: impl IntoIterator<Item = S>) -> Self {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, message: &str) -> bool {
        !self.parts.is_empty() && self.parts.iter().all(|part| message.contains(part.as_str()))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsoleReport {
    pub errors: Vec<LogEntry>,
    pub warnings: Vec<LogEntry>,
    pub logs: Vec<LogEntry>,
    /// Error-severity entries dropped by a benign pattern.
    pub suppressed: usize,
}

impl ConsoleReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConsoleClassifier {
    benign: Vec<BenignPattern>,
}

impl ConsoleClassifier {
    pub fn new(benign: Vec<BenignPattern>) -> Self {
        Self { benign }
    }

    pub fn from_config(patterns: &[Vec<String>]) -> Self {
        Self::new(
            patterns
                .iter()
                .map(|parts| BenignPattern::new(parts.iter().cloned()))
                .collect(),
        )
    }

    pub fn is_benign(&self, message: &str) -> bool {
        self.benign.iter().any(|pattern| pattern.matches(message))
    }

    pub fn is_real_error(&self, entry: &LogEntry) -> bool {
        entry.severity.is_error_like() && !self.is_benign(&entry.message)
    }

    pub fn classify(&self, entries: &[LogEntry]) -> ConsoleReport {
        let mut report = ConsoleReport::default();
        for entry in entries {
            match entry.severity {
                Severity::Warning => report.warnings.push(entry.clone()),
                Severity::Log => report.logs.push(entry.clone()),
                _ if self.is_real_error(entry) => report.errors.push(entry.clone()),
                _ if entry.severity.is_error_like() => {
                    log::debug!("Suppressed benign console entry: {}", entry.message);
                    report.suppressed += 1;
                }
                _ => {}
            }
        }
        report
    }
}
