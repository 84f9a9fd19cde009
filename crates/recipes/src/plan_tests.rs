// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::Catalog;
use ep_core::{ContractKind, JobState, StepRecord, StepState};
use serde_json::json;

fn input(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// =============================================================================
// build_plan
// =============================================================================

#[test]
fn user_input_wins_over_defaults() {
    let catalog = Catalog::shipped().unwrap();
    let recipe = catalog.require("transcribe_folder").unwrap();

    let plan = build_plan(
        recipe,
        &input(&[("folder", json!("/media/a")), ("use_gpu", json!(true))]),
        PlanOptions::default(),
    )
    .unwrap();

    let step = &plan.steps[0];
    assert_eq!(step.payload["folder_path"], "/media/a");
    // user override beats the recipe default of false
    assert_eq!(step.payload["use_gpu"], true);
    // untouched default still applies
    assert_eq!(step.payload["engine"], "base");
}

#[test]
fn payload_types_are_preserved() {
    let catalog = Catalog::shipped().unwrap();
    let recipe = catalog.require("transcribe_folder").unwrap();

    let plan = build_plan(
        recipe,
        &input(&[("folder", json!("/media/a"))]),
        PlanOptions::default(),
    )
    .unwrap();

    assert!(plan.steps[0].payload["use_gpu"].is_boolean());
    assert!(plan.steps[0].payload["folder_path"].is_string());
}

#[test]
fn step_config_fields_compile() {
    let catalog = Catalog::shipped().unwrap();
    let recipe = catalog.require("transcribe_folder").unwrap();

    let plan = build_plan(
        recipe,
        &input(&[("folder", json!("/media/a"))]),
        PlanOptions::default(),
    )
    .unwrap();

    let step = &plan.steps[0];
    assert!(step.cache_policy.enabled);
    assert_eq!(step.cache_policy.ttl_ms, Some(86_400_000));
    assert_eq!(step.output_contract, ContractKind::TranscribeOutput);
    assert_eq!(step.tool_versions.get("engine").map(String::as_str), Some("base"));
    assert_eq!(step.retry_policy.max_attempts, 2);
}

#[test]
fn step_without_retry_policy_inherits_plan_level() {
    let catalog = Catalog::shipped().unwrap();
    let recipe = catalog.require("prepare_project").unwrap();

    let plan = build_plan(
        recipe,
        &input(&[("project", json!("ep"))]),
        PlanOptions::default(),
    )
    .unwrap();

    for step in &plan.steps {
        assert_eq!(step.retry_policy.max_attempts, 1);
    }
}

#[test]
fn dependencies_carry_over() {
    let catalog = Catalog::shipped().unwrap();
    let recipe = catalog.require("lp_base_export_round1").unwrap();

    let plan = build_plan(recipe, &Map::new(), PlanOptions::default()).unwrap();
    let upload = plan
        .steps
        .iter()
        .find(|s| s.step_id == "upload")
        .unwrap();
    assert_eq!(upload.depends_on, vec![StepId::new("export"), StepId::new("auth")]);
}

#[test]
fn options_override_recipe_settings() {
    let catalog = Catalog::shipped().unwrap();
    let recipe = catalog.require("transcribe_folder").unwrap();

    let plan = build_plan(
        recipe,
        &input(&[("folder", json!("/a"))]),
        PlanOptions {
            idempotency_key: Some("key-1".into()),
            timeout_ms: Some(5_000),
            retry_policy: Some(RetryPolicy { max_attempts: 7 }),
            retry_of: None,
        },
    )
    .unwrap();

    assert_eq!(plan.idempotency_key.as_deref(), Some("key-1"));
    assert_eq!(plan.timeout_ms, 5_000);
    assert_eq!(plan.retry_policy.max_attempts, 7);
}

#[test]
fn plan_records_merged_input() {
    let catalog = Catalog::shipped().unwrap();
    let recipe = catalog.require("transcribe_folder").unwrap();

    let plan = build_plan(
        recipe,
        &input(&[("folder", json!("/a"))]),
        PlanOptions::default(),
    )
    .unwrap();

    assert_eq!(plan.input["folder"], "/a");
    assert_eq!(plan.input["engine"], "base");
}

#[test]
fn step_output_references_resolve_to_null_at_build_time() {
    // steps is empty in the build context; output references belong in the
    // outputs template and resolve after the job runs.
    let recipe: Recipe = serde_json::from_value(json!({
        "id": "probe",
        "steps": [{
            "id": "one",
            "worker": "resolve",
            "command": "update_text",
            "payload": {"text": "${steps.ghost.output}"}
        }]
    }))
    .unwrap();

    let plan = build_plan(&recipe, &Map::new(), PlanOptions::default()).unwrap();
    assert_eq!(plan.steps[0].payload["text"], Value::Null);
}

// =============================================================================
// materialize_outputs
// =============================================================================

fn finished_job(recipe: &Recipe, outputs: &[(&str, Value)]) -> Job {
    let steps = outputs
        .iter()
        .map(|(id, output)| {
            StepRecord::builder()
                .step_id(*id)
                .state(StepState::Succeeded)
                .output(output.clone())
                .build()
        })
        .collect();
    Job::builder()
        .preset_id(recipe.id.clone())
        .state(JobState::Succeeded)
        .steps(steps)
        .build()
}

#[test]
fn outputs_template_sees_step_outputs() {
    let catalog = Catalog::shipped().unwrap();
    let recipe = catalog.require("transcribe_folder").unwrap();

    let job = finished_job(
        recipe,
        &[(
            "transcribe",
            json!({
                "outputs": [{"file": "/a.wav", "output_paths": ["/a.txt"]}],
                "files_processed": 1,
            }),
        )],
    );

    let materialized = materialize_outputs(recipe, &job);
    assert_eq!(materialized["files_processed"], 1);
    assert_eq!(materialized["transcripts"][0]["file"], "/a.wav");
}

#[test]
fn missing_step_output_materializes_as_null() {
    let catalog = Catalog::shipped().unwrap();
    let recipe = catalog.require("transcribe_folder").unwrap();
    let job = finished_job(recipe, &[("transcribe", Value::Null)]);

    let materialized = materialize_outputs(recipe, &job);
    assert_eq!(materialized["transcripts"], Value::Null);
}
