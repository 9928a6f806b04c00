//! Value coercion helpers shared by the resolver, the run log, and step
//! behaviors.

use serde_json::Value;

/// Test a link's condition value against a step output.
///
/// The condition (always stored as a string) is coerced to the runtime type
/// of the output before comparing, so `"true"` matches `true`, `"3"` matches
/// `3`, and `"push"` matches `"push"`. A null output never matches, and a
/// condition that cannot be coerced does not match either.
pub fn condition_matches(condition: &str, output: &Value) -> bool {
    match output {
        Value::Null => false,
        Value::Bool(b) => parse_bool(condition) == Some(*b),
        Value::Number(n) => {
            let trimmed = condition.trim();
            if let Some(i) = n.as_i64() {
                if let Ok(c) = trimmed.parse::<i64>() {
                    return c == i;
                }
            } else if let Some(u) = n.as_u64() {
                if let Ok(c) = trimmed.parse::<u64>() {
                    return c == u;
                }
            }
            match (trimmed.parse::<f64>(), n.as_f64()) {
                (Ok(c), Some(f)) => c == f,
                _ => false,
            }
        }
        Value::String(s) => s == condition,
        Value::Array(_) | Value::Object(_) => serde_json::from_str::<Value>(condition)
            .map(|c| &c == output)
            .unwrap_or(false),
    }
}

/// Render a value the way it is stored in the run log: strings verbatim,
/// null as absent, everything else as JSON.
pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Read a value as an integer, accepting numeric strings.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

/// Loose truthiness used by the built-in conditional and fork steps.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => parse_bool(s).unwrap_or(!s.is_empty()),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
