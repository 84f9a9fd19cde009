// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plan compilation: recipe × input → submit-ready plan.

use crate::template::interpolate;
use crate::types::Recipe;
use crate::RecipeError;
use ep_core::{CachePolicy, ContractKind, Job, RetryPolicy, StepId, ToolVersions, Worker};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// One compiled step with a fully interpolated payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: StepId,
    pub worker: Worker,
    pub cmd: String,
    pub depends_on: Vec<StepId>,
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub cache_policy: CachePolicy,
    #[serde(default)]
    pub output_contract: ContractKind,
    #[serde(default)]
    pub tool_versions: ToolVersions,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

/// A recipe compiled against concrete input, ready for `Engine::submit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub preset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub timeout_ms: u64,
    pub retry_policy: RetryPolicy,
    pub steps: Vec<PlanStep>,
    /// Merged input the plan was built from (kept on the job for retry).
    #[serde(default)]
    pub input: Value,
    /// Outputs template, interpolated against step outputs at job success.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub outputs: Value,
}

/// Caller-supplied submit options.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub idempotency_key: Option<String>,
    /// Overrides the recipe's timeout when set.
    pub timeout_ms: Option<u64>,
    /// Overrides the recipe's retry budget when set.
    pub retry_policy: Option<RetryPolicy>,
    /// Job id this launch retries, if any.
    pub retry_of: Option<String>,
}

/// Compile `recipe` against user input.
///
/// Defaults merge under the user input (user wins); the interpolation
/// context exposes `recipe`, `defaults`, `input`, and an empty `steps`
/// mapping (step-output references only resolve in the outputs template,
/// after the job has run).
pub fn build_plan(
    recipe: &Recipe,
    user_input: &Map<String, Value>,
    options: PlanOptions,
) -> Result<Plan, RecipeError> {
    let mut merged = recipe.defaults.clone();
    for (key, value) in user_input {
        merged.insert(key.clone(), value.clone());
    }

    let ctx = json!({
        "recipe": {"id": recipe.id, "version": recipe.version},
        "defaults": recipe.defaults,
        "input": merged,
        "steps": {},
    });

    let mut steps = Vec::with_capacity(recipe.steps.len());
    for step in &recipe.steps {
        let payload = match interpolate(&step.payload, &ctx) {
            Value::Object(m) => m,
            Value::Null => Map::new(),
            other => {
                return Err(RecipeError::invalid(
                    &recipe.id,
                    format!(
                        "step {}: payload template must interpolate to a mapping, got {}",
                        step.id,
                        other
                    ),
                ))
            }
        };

        steps.push(PlanStep {
            step_id: StepId::new(step.id.clone()),
            worker: step.worker,
            cmd: step.command.clone(),
            depends_on: step.depends_on.iter().map(StepId::new).collect(),
            payload,
            cache_policy: config_field(recipe, step, &step.cache_policy, &ctx, "cache_policy")?,
            output_contract: config_field(
                recipe,
                step,
                &step.output_contract,
                &ctx,
                "output_contract",
            )?,
            tool_versions: config_field(recipe, step, &step.tool_versions, &ctx, "tool_versions")?,
            retry_policy: match &step.retry_policy {
                Value::Null => recipe.retry_policy,
                template => config_field(recipe, step, template, &ctx, "retry_policy")?,
            },
        });
    }

    Ok(Plan {
        preset_id: recipe.id.clone(),
        idempotency_key: options.idempotency_key,
        timeout_ms: options.timeout_ms.unwrap_or(recipe.timeout_ms),
        retry_policy: options.retry_policy.unwrap_or(recipe.retry_policy),
        steps,
        input: Value::Object(merged),
        outputs: recipe.outputs.clone(),
    })
}

/// Interpolate and deserialize one per-step config template.
fn config_field<T>(
    recipe: &Recipe,
    step: &crate::types::RecipeStep,
    template: &Value,
    ctx: &Value,
    field: &str,
) -> Result<T, RecipeError>
where
    T: serde::de::DeserializeOwned + Default,
{
    if template.is_null() {
        return Ok(T::default());
    }
    let resolved = interpolate(template, ctx);
    serde_json::from_value(resolved).map_err(|e| {
        RecipeError::invalid(
            &recipe.id,
            format!("step {}: invalid {field}: {e}", step.id),
        )
    })
}

/// Interpolate the recipe's outputs template against a finished job.
///
/// Each finished step's output is exposed under `steps.<step_id>.output`.
pub fn materialize_outputs(recipe: &Recipe, job: &Job) -> Value {
    let mut steps = Map::new();
    for step in &job.steps {
        let mut entry = Map::new();
        entry.insert(
            "output".to_string(),
            step.output.clone().unwrap_or(Value::Null),
        );
        steps.insert(step.step_id.as_str().to_string(), Value::Object(entry));
    }

    let ctx = json!({
        "recipe": {"id": recipe.id, "version": recipe.version},
        "defaults": recipe.defaults,
        "input": job.input,
        "steps": steps,
    });

    interpolate(&recipe.outputs, &ctx)
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod tests;
