//! Parameter placeholder resolution and condition evaluation
//!
//! - A string that is exactly `$name` (or `$name.field.0`) is replaced by
//!   the variable's value, keeping its JSON type
//! - `{{name}}` inside a string is interpolated as text
//! - Unknown references are left untouched

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

pub type Variables = HashMap<String, Value>;

static REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)$").unwrap());

static TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z0-9_]+)*)\s*\}\}").unwrap());

static COMPARISON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?)\s*(==|!=|>=|<=|>|<)\s*(.+)$").unwrap());

/// Look up a dotted reference (`name.field.0`) in the variable table
pub fn lookup(vars: &Variables, reference: &str) -> Option<Value> {
    let mut parts = reference.split('.');
    let mut current = vars.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Replace `{{name}}` occurrences with the variable's text
pub fn interpolate(template: &str, vars: &Variables) -> String {
    TEMPLATE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            lookup(vars, &caps[1])
                .map(|v| as_text(&v))
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Resolve every placeholder in a parameter tree
pub fn resolve(value: &Value, vars: &Variables) -> Value {
    match value {
        Value::String(s) => {
            if let Some(caps) = REFERENCE.captures(s) {
                if let Some(found) = lookup(vars, &caps[1]) {
                    return found;
                }
                return value.clone();
            }
            if s.contains("{{") {
                Value::String(interpolate(s, vars))
            } else {
                value.clone()
            }
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve(v, vars)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve(v, vars)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Truthiness used by conditions
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => {
            let s = s.trim().to_lowercase();
            !(s.is_empty() || s == "false" || s == "0" || s == "no")
        }
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn operand(raw: &str, vars: &Variables) -> Value {
    let raw = raw.trim();
    if let Some(caps) = REFERENCE.captures(raw) {
        if let Some(found) = lookup(vars, &caps[1]) {
            return found;
        }
    }
    let quoted = (raw.starts_with('"') && raw.ends_with('"'))
        || (raw.starts_with('\'') && raw.ends_with('\''));
    if quoted && raw.len() >= 2 {
        return Value::String(raw[1..raw.len() - 1].to_string());
    }
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn compare(left: &Value, op: &str, right: &Value) -> bool {
    if let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) {
        return match op {
            "==" => l == r,
            "!=" => l != r,
            ">" => l > r,
            "<" => l < r,
            ">=" => l >= r,
            "<=" => l <= r,
            _ => false,
        };
    }
    let (l, r) = (as_text(left), as_text(right));
    match op {
        "==" => l == r,
        "!=" => l != r,
        ">" => l > r,
        "<" => l < r,
        ">=" => l >= r,
        "<=" => l <= r,
        _ => false,
    }
}

/// Evaluate a literal, variable-referenced, or string condition
pub fn evaluate_condition(condition: &Value, vars: &Variables) -> bool {
    let Value::String(raw) = condition else {
        return truthy(condition);
    };

    let text = interpolate(raw.trim(), vars);
    if let Some(caps) = REFERENCE.captures(&text) {
        return lookup(vars, &caps[1]).map(|v| truthy(&v)).unwrap_or(false);
    }
    if let Some(caps) = COMPARISON.captures(&text) {
        let left = operand(&caps[1], vars);
        let right = operand(&caps[3], vars);
        return compare(&left, &caps[2], &right);
    }
    truthy(&Value::String(text))
}
