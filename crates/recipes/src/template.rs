// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `${...}` interpolation over JSON trees.
//!
//! A string that is exactly one placeholder substitutes by value,
//! preserving the type of the resolved leaf. A string with embedded
//! placeholders substitutes by string conversion, with unresolved
//! references becoming the empty string. Interpolation recurses into
//! arrays and mappings and is idempotent for a fixed context.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Pattern for `${name}` or `${namespace.name}` references.
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_-]*)*)\}")
        .expect("constant regex pattern is valid")
});

/// Resolve a `.`-separated path over the interpolation context.
///
/// Missing leaves (or traversal through a non-mapping) yield `None`.
pub fn resolve_path<'a>(ctx: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = ctx;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Interpolate every `${...}` reference in `template` against `ctx`.
pub fn interpolate(template: &Value, ctx: &Value) -> Value {
    match template {
        Value::String(s) => interpolate_string(s, ctx),
        Value::Array(items) => Value::Array(items.iter().map(|v| interpolate(v, ctx)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), interpolate(v, ctx)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn interpolate_string(s: &str, ctx: &Value) -> Value {
    // Whole-string placeholder: substitute by value, preserving type.
    if let Some(caps) = VAR_PATTERN.captures(s) {
        if let Some(whole) = caps.get(0) {
            if whole.start() == 0 && whole.end() == s.len() {
                return match caps.get(1).and_then(|m| resolve_path(ctx, m.as_str())) {
                    Some(v) => v.clone(),
                    None => Value::Null,
                };
            }
        }
    }

    // Embedded placeholders: substitute by string conversion.
    let replaced = VAR_PATTERN.replace_all(s, |caps: &regex::Captures| {
        resolve_path(ctx, &caps[1]).map(stringify).unwrap_or_default()
    });
    Value::String(replaced.into_owned())
}

/// String form of a resolved leaf for embedded substitution.
fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Arrays and mappings embed as compact JSON.
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
