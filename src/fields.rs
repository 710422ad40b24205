//! Field lookup helpers for loosely-typed JSON records
//!
//! Every source spells the same field several ways (`id_str` vs `id`,
//! `question` vs `title`, counts as numbers or strings). These helpers try a
//! list of keys in order and coerce the first usable value.

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// First present, non-null value among `keys`
pub fn pick<'a>(root: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| root.get(*key).filter(|v| !v.is_null()))
}

/// First non-empty string among `keys`; numbers are rendered as strings
pub fn pick_str(root: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match root.get(*key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// First value among `keys` that reads as a non-negative integer count
pub fn pick_u64(root: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| match root.get(*key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    })
}

/// First value among `keys` that parses as a decimal
pub fn pick_decimal(root: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter().find_map(|key| match root.get(*key) {
        Some(Value::Number(n)) => n
            .as_f64()
            .and_then(|f| Decimal::from_str(&f.to_string()).ok()),
        Some(Value::String(s)) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    })
}

/// First value among `keys` interpreted as a boolean flag
pub fn pick_bool(root: &Value, keys: &[&str]) -> bool {
    keys.iter().any(|key| match root.get(*key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// A list of strings that may arrive as a JSON array or as a JSON-encoded string
pub fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect(),
        Value::String(s) => serde_json::from_str::<Value>(s)
            .map(|inner| match inner {
                Value::Array(_) => string_list(&inner),
                _ => Vec::new(),
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}
