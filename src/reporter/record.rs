use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Failure;

/// Longest message kept in the local diagnostic copy, in characters.
pub const MAX_DIAGNOSTIC_MESSAGE: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Error,
    Warning,
    Info,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
        }
    }
}

/// Whatever the failure site had in hand.
#[derive(Debug, Clone)]
pub enum ErrorInput {
    Failure(Failure),
    /// A Rust error flattened to its `Display` and its `source()` chain.
    Error { message: String, chain: Vec<String> },
    /// A JSON error object, as delivered by a backend or a foreign boundary.
    Json(Value),
    Text(String),
}

impl ErrorInput {
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut cur = err.source();
        while let Some(e) = cur {
            chain.push(e.to_string());
            cur = e.source();
        }
        ErrorInput::Error { message: err.to_string(), chain }
    }

    /// Message and optional stack. Never fails: unknown shapes are stringified.
    pub fn extract(&self) -> (String, Option<String>) {
        match self {
            ErrorInput::Failure(f) => (f.to_string(), None),
            ErrorInput::Error { message, chain } => {
                let stack = if chain.is_empty() {
                    None
                } else {
                    Some(chain.iter().map(|c| format!("caused by: {}", c)).collect::<Vec<_>>().join("\n"))
                };
                (message.clone(), stack)
            }
            ErrorInput::Json(v) => {
                let message = match v.get("message") {
                    Some(Value::String(s)) => s.clone(),
                    _ => stringify(v),
                };
                let stack = v.get("stack").and_then(|s| s.as_str()).map(|s| s.to_string());
                (message, stack)
            }
            ErrorInput::Text(s) => (s.clone(), None),
        }
    }
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl From<Failure> for ErrorInput {
    fn from(f: Failure) -> Self { ErrorInput::Failure(f) }
}

impl From<anyhow::Error> for ErrorInput {
    fn from(err: anyhow::Error) -> Self {
        ErrorInput::Error {
            message: err.to_string(),
            chain: err.chain().skip(1).map(|e| e.to_string()).collect(),
        }
    }
}

impl From<Value> for ErrorInput {
    fn from(v: Value) -> Self { ErrorInput::Json(v) }
}

impl From<&str> for ErrorInput {
    fn from(s: &str) -> Self { ErrorInput::Text(s.to_string()) }
}

impl From<String> for ErrorInput {
    fn from(s: String) -> Self { ErrorInput::Text(s) }
}

/// Structured failure as shipped to the remote sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub context_info: String,
    pub level: Level,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ref: Option<String>,
    pub timestamp: String,
}

impl ErrorRecord {
    pub fn build(input: &ErrorInput, context_info: Option<&Value>, level: Level, url: &str, user_ref: Option<String>) -> Self {
        let (message, stack) = input.extract();
        Self {
            message,
            stack,
            context_info: context_string(context_info),
            level,
            url: url.to_string(),
            user_ref,
            timestamp: now_timestamp(),
        }
    }
}

/// Context is always carried as a string; structured values are serialized.
pub fn context_string(context: Option<&Value>) -> String {
    match context {
        None | Some(Value::Null) => "{}".to_string(),
        Some(v) => stringify(v),
    }
}

/// RFC 3339 UTC with millisecond precision; sorts lexically.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The compact local copy: no stack, no user identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticEntry {
    pub message: String,
    pub url: String,
    pub timestamp: String,
}

impl DiagnosticEntry {
    pub fn from_record(record: &ErrorRecord) -> Self {
        Self {
            message: truncate_chars(&record.message, MAX_DIAGNOSTIC_MESSAGE),
            url: record.url.clone(),
            timestamp: record.timestamp.clone(),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_without_message_is_stringified() {
        let (msg, stack) = ErrorInput::Json(json!({"code": 42})).extract();
        assert_eq!(msg, r#"{"code":42}"#);
        assert!(stack.is_none());
        let (msg, stack) = ErrorInput::Json(json!({"message": "boom", "stack": "at fees.rs:10"})).extract();
        assert_eq!(msg, "boom");
        assert_eq!(stack.as_deref(), Some("at fees.rs:10"));
        let (msg, _) = ErrorInput::Json(json!({"message": 7})).extract();
        assert_eq!(msg, r#"{"message":7}"#);
    }

    #[test]
    fn anyhow_chain_becomes_stack() {
        let err = anyhow::anyhow!("disk full").context("saving ledger");
        let (msg, stack) = ErrorInput::from(err).extract();
        assert_eq!(msg, "saving ledger");
        assert_eq!(stack.as_deref(), Some("caused by: disk full"));
    }

    #[test]
    fn std_error_chain_is_walked() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "socket closed");
        let (msg, stack) = ErrorInput::from_error(&io).extract();
        assert_eq!(msg, "socket closed");
        assert!(stack.is_none());
    }

    #[test]
    fn context_is_always_a_string() {
        assert_eq!(context_string(None), "{}");
        assert_eq!(context_string(Some(&json!("fee screen"))), "fee screen");
        assert_eq!(context_string(Some(&json!({"screen": "fees"}))), r#"{"screen":"fees"}"#);
    }

    #[test]
    fn record_uses_camel_case_and_sortable_time() {
        let rec = ErrorRecord::build(&"boom".into(), None, Level::Warning, "collegium://app/fees", Some("u-1".into()));
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["contextInfo"], "{}");
        assert_eq!(v["userRef"], "u-1");
        assert_eq!(v["level"], "warning");
        assert!(v.get("stack").is_none());
        assert!(rec.timestamp.ends_with('Z'));
        assert_eq!(rec.timestamp.len(), "2026-01-01T00:00:00.000Z".len());
    }

    #[test]
    fn diagnostic_entry_is_compact_and_bounded() {
        let long = "é".repeat(MAX_DIAGNOSTIC_MESSAGE + 20);
        let mut rec = ErrorRecord::build(&long.as_str().into(), None, Level::Error, "u", Some("u-1".into()));
        rec.stack = Some("trace".into());
        let entry = DiagnosticEntry::from_record(&rec);
        assert_eq!(entry.message.chars().count(), MAX_DIAGNOSTIC_MESSAGE);
        let v = serde_json::to_value(&entry).unwrap();
        assert!(v.get("stack").is_none());
        assert!(v.get("userRef").is_none());
    }
}
