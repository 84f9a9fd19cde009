// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step fingerprinting.

use crate::signature::SourceSignature;
use ep_core::ToolVersions;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Serialize a JSON value with object keys sorted at every level.
///
/// Arrays keep their order. This is the stable form hashed by
/// [`fingerprint`]; equal values always canonicalize to equal strings.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Key serialization cannot fail for a string.
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&serde_json::to_string(scalar).unwrap_or_default()),
    }
}

/// Hex digest identifying a step's inputs.
///
/// Hashes the canonical serialization of `{cmd, payload, sources,
/// tool_versions}`. Stable across runs on the same inputs.
pub fn fingerprint(
    cmd: &str,
    payload: &Map<String, Value>,
    sources: &[SourceSignature],
    tool_versions: &ToolVersions,
) -> String {
    let document = serde_json::json!({
        "cmd": cmd,
        "payload": payload,
        "sources": sources,
        "tool_versions": tool_versions,
    });
    let digest = Sha256::digest(canonical_json(&document).as_bytes());
    format!("{digest:x}")
}

#[cfg(test)]
#[path = "fingerprint_tests.rs"]
mod tests;
