//! First-match-wins lookups over loosely shaped JSON.
//!
//! The research service has moved fields between keys across versions.
//! Every field is read by walking an ordered key list and applying one
//! typed accessor; the first key whose value the accessor accepts wins.

use serde_json::{json, Value};

/// Normalizes a raw `results` value.
///
/// Strings are parsed as JSON; text that is not JSON becomes
/// `{"markdown": <text>}`. Objects and arrays pass through. Null and absent
/// values become `None`.
pub fn normalize_results(raw: Option<&Value>) -> Option<Value> {
    match raw? {
        Value::Null => None,
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Null) => None,
            Ok(parsed) => Some(parsed),
            Err(_) => Some(json!({ "markdown": text })),
        },
        other => Some(other.clone()),
    }
}

/// Returns the first value under `keys` that `accessor` accepts.
pub fn first<'a, T>(
    value: &'a Value,
    keys: &[&str],
    accessor: impl Fn(&'a Value) -> Option<T>,
) -> Option<T> {
    let object = value.as_object()?;
    keys.iter()
        .filter_map(|key| object.get(*key))
        .find_map(accessor)
}

/// Non-blank string.
pub fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// String, number or bool rendered as a non-blank string.
pub fn label(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => text(other),
    }
}

/// Finite number, also accepted as a numeric string.
pub fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Number rounded to the nearest integer.
pub fn integer(value: &Value) -> Option<i64> {
    number(value).map(|n| n.round() as i64)
}

/// JSON object.
pub fn object(value: &Value) -> Option<&Value> {
    value.is_object().then_some(value)
}

/// JSON array.
pub fn array(value: &Value) -> Option<&Vec<Value>> {
    value.as_array()
}

/// Clamps a progress reading into `0..=100`, rounding to the nearest integer.
pub fn clamp_progress(value: Option<&Value>) -> Option<i64> {
    let n = number(value?)?;
    Some(n.clamp(0.0, 100.0).round() as i64)
}
