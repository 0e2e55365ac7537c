//! Helpers for reading loosely-typed node configs.
//!
//! The editor stores most values as strings, so numeric and boolean readers
//! accept both the native JSON type and its string spelling.

use serde_json::{Map, Value};

use crate::NodeError;

/// Non-empty string value at `key`.
pub fn str_field<'c>(config: &'c Value, key: &str) -> Option<&'c str> {
    config.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

pub fn required_str<'c>(config: &'c Value, key: &'static str) -> Result<&'c str, NodeError> {
    str_field(config, key).ok_or_else(|| NodeError::missing(key))
}

pub fn u64_field(config: &Value, key: &str) -> Option<u64> {
    match config.get(key)? {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

pub fn f64_field(config: &Value, key: &str) -> Option<f64> {
    match config.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn bool_field(config: &Value, key: &str) -> Option<bool> {
    match config.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// A list given either as a JSON array of strings or a comma-separated string.
pub fn string_list(config: &Value, key: &str) -> Vec<String> {
    match config.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    }
}

/// An object given either inline or as a JSON-encoded string.
pub fn object_field(config: &Value, key: &'static str) -> Result<Option<Map<String, Value>>, NodeError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map.clone())),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(NodeError::invalid(key, "expected a JSON object")),
            Err(e) => Err(NodeError::invalid(key, e.to_string())),
        },
        Some(_) => Err(NodeError::invalid(key, "expected an object")),
    }
}
