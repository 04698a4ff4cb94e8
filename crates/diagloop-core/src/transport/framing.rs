//! Response body framing
//!
//! The endpoint answers either with a plain JSON document or with event-stream
//! framing where each `data:` line holds one JSON document. Both are accepted.

use serde_json::Value;

use super::RpcResponse;

const DATA_PREFIX: &str = "data:";

/// Decode every JSON document carried by a response body.
///
/// Event-stream `data:` lines are decoded independently and malformed ones are
/// skipped. A body without any `data:` line is decoded as a single document.
pub fn decode_documents(body: &str) -> Vec<Value> {
    let mut saw_data_line = false;
    let mut documents = Vec::new();

    for line in body.lines() {
        let Some(payload) = line.trim_start().strip_prefix(DATA_PREFIX) else {
            continue;
        };
        saw_data_line = true;
        match serde_json::from_str::<Value>(payload.trim()) {
            Ok(doc) => documents.push(doc),
            Err(e) => log::debug!("Skipping malformed event-stream line: {}", e),
        }
    }

    if !saw_data_line {
        match serde_json::from_str::<Value>(body.trim()) {
            Ok(Value::Array(batch)) => documents.extend(batch),
            Ok(doc) => documents.push(doc),
            Err(e) => log::debug!("Response body is not JSON: {}", e),
        }
    }

    documents
}

fn id_matches(candidate: &Value, id: u64) -> bool {
    match candidate {
        Value::Number(n) => n.as_u64() == Some(id),
        Value::String(s) => s.parse::<u64>().ok() == Some(id),
        _ => false,
    }
}

/// Find the first document in `body` whose `id` equals `id`.
pub fn find_response(body: &str, id: u64) -> Option<RpcResponse> {
    decode_documents(body)
        .into_iter()
        .filter(|doc| doc.get("id").map_or(false, |v| id_matches(v, id)))
        .find_map(|doc| serde_json::from_value::<RpcResponse>(doc).ok())
}
