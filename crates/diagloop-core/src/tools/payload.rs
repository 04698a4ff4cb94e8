//! Tool result envelopes and the decoded payload they carry

use serde::Deserialize;
use serde_json::Value;

use super::literal::parse_literal;
use crate::errors::DiagError;

/// One item in a `tools/call` result.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentItem {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|item| match item {
            ContentItem::Text { text } => Some(text.as_str()),
            ContentItem::Other => None,
        })
    }
}

/// What a tool handed back, decoded once at the transport boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolPayload {
    Structured(Value),
    /// Text that neither JSON nor the literal fallback could decode.
    Text(String),
    /// The result had no text content item.
    Empty,
}

impl ToolPayload {
    /// Decode a text item: JSON first, then the lenient literal fallback, and
    /// finally the raw text unchanged.
    pub fn from_text(text: &str) -> Self {
        if let Ok(value) = serde_json::from_str::<Value>(text) {
            return ToolPayload::Structured(value);
        }
        let trimmed = text.trim_start();
        if trimmed.starts_with('{') || trimmed.starts_with('[') || trimmed.starts_with('(') {
            if let Some(value) = parse_literal(text) {
                log::debug!("Tool payload decoded with literal fallback");
                return ToolPayload::Structured(value);
            }
        }
        ToolPayload::Text(text.to_string())
    }

    pub fn from_result(result: &ToolCallResult) -> Self {
        match result.first_text() {
            Some(text) => Self::from_text(text),
            None => ToolPayload::Empty,
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            ToolPayload::Structured(value) => Some(value),
            _ => None,
        }
    }

    /// Require a structured payload, for callers that cannot proceed without one.
    pub fn into_structured(self, context: &str) -> Result<Value, DiagError> {
        match self {
            ToolPayload::Structured(value) => Ok(value),
            ToolPayload::Text(text) => {
                log::error!("{} returned undecodable text: {}", context, text);
                Err(DiagError::unrecognized_shape(context))
            }
            ToolPayload::Empty => Err(DiagError::Protocol(format!(
                "{} returned no text content",
                context
            ))),
        }
    }
}

/// Peel `{data: ...}` wrappers, which many tools put around their real payload.
pub fn unwrap_data(value: &Value) -> &Value {
    let mut current = value;
    while let Some(inner) = current.get("data") {
        if inner.is_null() {
            break;
        }
        current = inner;
    }
    current
}
