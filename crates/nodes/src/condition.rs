//! Comparison operators shared by `logic.if`, `data.filter` and `logic.switch`.

use std::cmp::Ordering;
use std::str::FromStr;

use serde_json::Value;

use crate::expression::number_to_value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
}

impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" | "equals" | "==" => Ok(Self::Eq),
            "neq" | "notEquals" | "!=" => Ok(Self::Neq),
            "gt" | ">" => Ok(Self::Gt),
            "gte" | ">=" => Ok(Self::Gte),
            "lt" | "<" => Ok(Self::Lt),
            "lte" | "<=" => Ok(Self::Lte),
            "contains" => Ok(Self::Contains),
            "notContains" => Ok(Self::NotContains),
            "startsWith" => Ok(Self::StartsWith),
            "endsWith" => Ok(Self::EndsWith),
            "isEmpty" => Ok(Self::IsEmpty),
            "isNotEmpty" => Ok(Self::IsNotEmpty),
            other => Err(format!("unknown operator '{other}'")),
        }
    }
}

/// Numeric view of a value: JSON numbers and numeric strings.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Text view of a value; `null` is the empty string.
pub fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n
            .as_f64()
            .and_then(number_to_value)
            .map(|v| v.to_string())
            .unwrap_or_else(|| n.to_string()),
        other => other.to_string(),
    }
}

/// Loose equality: numeric when both sides are numeric, textual otherwise.
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l == r,
        _ => as_text(left) == as_text(right),
    }
}

fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (as_number(left), as_number(right)) {
        (Some(l), Some(r)) => l.partial_cmp(&r),
        _ => Some(as_text(left).cmp(&as_text(right))),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::Object(map) => map.contains_key(&as_text(needle)),
        other => as_text(other).contains(&as_text(needle)),
    }
}

/// Apply `op` to `left` and `right`.
pub fn compare(left: &Value, op: Operator, right: &Value) -> bool {
    match op {
        Operator::Eq => loose_eq(left, right),
        Operator::Neq => !loose_eq(left, right),
        Operator::Gt => ordering(left, right) == Some(Ordering::Greater),
        Operator::Gte => matches!(ordering(left, right), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt => ordering(left, right) == Some(Ordering::Less),
        Operator::Lte => matches!(ordering(left, right), Some(Ordering::Less | Ordering::Equal)),
        Operator::Contains => contains(left, right),
        Operator::NotContains => !contains(left, right),
        Operator::StartsWith => as_text(left).starts_with(&as_text(right)),
        Operator::EndsWith => as_text(left).ends_with(&as_text(right)),
        Operator::IsEmpty => is_empty(left),
        Operator::IsNotEmpty => !is_empty(left),
    }
}
