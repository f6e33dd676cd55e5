use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error envelope returned by the subscription service on non-success statuses.
///
/// Domain failures carry a plain string; request validation failures carry a
/// list of field errors, each with a `msg`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceErrorBody {
    pub detail: Value,
}

impl ServiceErrorBody {
    pub fn message(&self) -> String {
        match &self.detail {
            Value::String(text) => text.clone(),
            Value::Array(entries) => entries
                .iter()
                .map(|entry| match entry.get("msg").and_then(Value::as_str) {
                    Some(msg) => msg.to_string(),
                    None => entry.to_string(),
                })
                .collect::<Vec<_>>()
                .join("; "),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}
