//! Redaction of tool parameters before they reach the audit trail
//!
//! Only the logged copy is sanitized; executors always see the original
//! values.

use crate::types::{ParamValue, ToolParams};
use serde_json::{Map, Value};

pub const REDACTED: &str = "[REDACTED]";

/// Key fragments that mark a parameter as secret (case-insensitive)
const SENSITIVE_KEY_FRAGMENTS: &[&str] = &["password", "secret", "token", "key", "credential", "auth"];

/// Strings longer than this are replaced by a length marker
pub const MAX_LOGGED_STRING_CHARS: usize = 1000;

pub fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEY_FRAGMENTS.iter().any(|f| key.contains(f))
}

/// Audit-safe copy of `params`
pub fn sanitize_params(params: &ToolParams) -> Value {
    let mut sanitized = Map::new();
    for (key, value) in params {
        let logged = if is_sensitive_key(key) {
            Value::String(REDACTED.to_string())
        } else {
            match value {
                ParamValue::Binary(bytes) => binary_marker(bytes.len()),
                ParamValue::Json(json) => sanitize_value(json),
            }
        };
        sanitized.insert(key.clone(), logged);
    }
    Value::Object(sanitized)
}

fn sanitize_value(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            let chars = s.chars().count();
            if chars > MAX_LOGGED_STRING_CHARS {
                Value::String(format!("[String: {} chars]", chars))
            } else {
                value.clone()
            }
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let logged = if is_sensitive_key(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize_value(v)
                    };
                    (k.clone(), logged)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_value).collect()),
        other => other.clone(),
    }
}

fn binary_marker(len: usize) -> Value {
    Value::String(format!("[Binary: {} bytes]", len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_sensitive_keys_redacted() {
        let mut params = ToolParams::new();
        params.insert("command".into(), "ls".into());
        params.insert("API_KEY".into(), "abc".into());
        params.insert("authHeader".into(), "Bearer x".into());
        params.insert("dbPassword".into(), json!({ "nested": true }).into());

        assert_eq!(
            sanitize_params(&params),
            json!({
                "API_KEY": REDACTED,
                "authHeader": REDACTED,
                "command": "ls",
                "dbPassword": REDACTED,
            })
        );
    }

    #[test]
    fn test_long_strings_and_binary_replaced() {
        let mut params = ToolParams::new();
        params.insert("content".into(), "x".repeat(MAX_LOGGED_STRING_CHARS + 1).into());
        params.insert("short".into(), "y".repeat(MAX_LOGGED_STRING_CHARS).into());
        params.insert("payload".into(), vec![0u8; 42].into());

        let sanitized = sanitize_params(&params);
        assert_eq!(sanitized["content"], json!("[String: 1001 chars]"));
        assert_eq!(sanitized["short"].as_str().unwrap().len(), MAX_LOGGED_STRING_CHARS);
        assert_eq!(sanitized["payload"], json!("[Binary: 42 bytes]"));
    }

    #[test]
    fn test_nested_values_sanitized() {
        let mut params = ToolParams::new();
        params.insert(
            "request".into(),
            json!({ "headers": { "Authorization": "Bearer x" }, "body": ["ok"] }).into(),
        );

        let sanitized = sanitize_params(&params);
        assert_eq!(sanitized["request"]["headers"]["Authorization"], json!(REDACTED));
        assert_eq!(sanitized["request"]["body"], json!(["ok"]));
    }

    #[test]
    fn test_original_untouched() {
        let mut params = ToolParams::new();
        params.insert("token".into(), "s3cr3t".into());
        let _ = sanitize_params(&params);
        assert_eq!(params["token"], ParamValue::from("s3cr3t"));
    }
}
