// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Recipe definition types.

use ep_core::{RetryPolicy, Worker};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Declared user input of a recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Scalar kind: "string", "boolean", or "number".
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// One step of a recipe. Payload and the execution-config fields are
/// templates; `${...}` references are interpolated at plan build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeStep {
    /// Unique within the recipe.
    pub id: String,
    pub worker: Worker,
    pub command: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub cache_policy: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output_contract: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub tool_versions: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub retry_policy: Value,
}

impl Default for RecipeStep {
    fn default() -> Self {
        Self {
            id: String::new(),
            worker: Worker::Resolve,
            command: String::new(),
            depends_on: Vec::new(),
            payload: Value::Object(Map::new()),
            cache_policy: Value::Null,
            output_contract: Value::Null,
            tool_versions: Value::Null,
            retry_policy: Value::Null,
        }
    }
}

/// A declarative multi-step recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub inputs: IndexMap<String, InputSpec>,
    #[serde(default)]
    pub defaults: Map<String, Value>,
    pub steps: Vec<RecipeStep>,
    /// Interpolation template materialized after the job finishes.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub outputs: Value,
    /// Plan-level request timeout; 0 disables it.
    #[serde(default)]
    pub timeout_ms: u64,
    /// Plan-level retry budget, overridable per step.
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

fn default_version() -> u32 {
    1
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
