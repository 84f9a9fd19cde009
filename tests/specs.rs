// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level end-to-end scenarios, driven through the control plane
//! against the scripted worker pool.

use ep_control::{ControlPlane, PrefsPatch};
use ep_core::{
    ErrorCategory, FakeClock, JobId, JobState, RetryPolicy, SequentialIdGen, StepId, StepState,
    Worker,
};
use ep_engine::{Engine, EngineConfig};
use ep_recipes::{Catalog, Plan, PlanOptions, PlanStep};
use ep_storage::PrefsStore;
use ep_supervisor::{FakePool, ScriptedReply};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct World {
    plane: Arc<ControlPlane>,
    engine: Engine,
    pool: Arc<FakePool>,
    _dir: TempDir,
}

fn world() -> World {
    world_with_cancel_delay(50)
}

fn world_with_cancel_delay(cancel_delay_ms: u64) -> World {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    let mut config = EngineConfig::new(
        dir.path().join("journal.jsonl"),
        dir.path().join("cache.json"),
    );
    config.cancel_kill_delay = Duration::from_millis(cancel_delay_ms);
    let engine = Engine::start(
        config,
        Arc::clone(&pool),
        FakeClock::new(),
        SequentialIdGen::new("job"),
    )
    .unwrap();
    let plane = ControlPlane::new(
        engine.clone(),
        Catalog::shipped().unwrap(),
        PrefsStore::new(dir.path().join("preferences.json")),
    );
    World {
        plane,
        engine,
        pool,
        _dir: dir,
    }
}

fn input(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

async fn wait_terminal(plane: &ControlPlane, job_id: &JobId) -> ep_core::Job {
    for _ in 0..600 {
        if let Some(job) = plane.jobs_get(job_id).await {
            if job.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} did not reach a terminal state");
}

/// Scenario 1: happy path, single transcription step.
#[tokio::test]
async fn transcribe_folder_happy_path() {
    let world = world();

    // Real files so the transcribe_output contract holds.
    let media = tempfile::tempdir().unwrap();
    let wav = media.path().join("a.wav");
    let txt = media.path().join("a.txt");
    std::fs::write(&wav, b"pcm").unwrap();
    std::fs::write(&txt, b"words").unwrap();

    world.pool.script_ok(
        "transcribe_folder",
        json!({
            "outputs": [{"file": wav.to_string_lossy(), "output_paths": [txt.to_string_lossy()]}],
            "files_processed": 1,
        }),
    );

    let mut events = world.plane.subscribe();
    let receipt = world
        .plane
        .launch_recipe(
            "transcribe_folder",
            input(&[
                ("folder", json!(media.path().to_string_lossy())),
                ("use_gpu", json!(false)),
            ]),
            PlanOptions::default(),
        )
        .await
        .unwrap();

    let done = wait_terminal(&world.plane, &receipt.job_id).await;
    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(done.steps[0].attempt, 1);

    // Materialized outputs reflect the step output.
    assert_eq!(done.outputs[0]["files_processed"], 1);
    assert_eq!(
        done.outputs[0]["transcripts"][0]["file"],
        wav.to_string_lossy().as_ref()
    );

    // The worker saw the interpolated payload with preserved types.
    let call = &world.pool.calls_for("transcribe_folder")[0];
    assert_eq!(call.payload["use_gpu"], false);
    assert_eq!(call.payload["engine"], "base");

    // Exactly one succeeded job_state event.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let mut succeeded = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(
            event,
            ep_core::EngineEvent::JobState {
                state: JobState::Succeeded,
                ..
            }
        ) {
            succeeded += 1;
        }
    }
    assert_eq!(succeeded, 1);

    world.engine.shutdown().await;
}

/// Scenario 2: retry then success.
#[tokio::test]
async fn retryable_error_consumes_one_attempt_then_succeeds() {
    let world = world();
    world.pool.script(
        "connect",
        ScriptedReply::Err(ep_core::WorkerFailure::retryable("temporary")),
    );

    let plan = Plan {
        preset_id: "probe".to_string(),
        idempotency_key: None,
        timeout_ms: 0,
        retry_policy: RetryPolicy { max_attempts: 2 },
        steps: vec![PlanStep {
            step_id: StepId::new("s1"),
            worker: Worker::Resolve,
            cmd: "connect".to_string(),
            depends_on: Vec::new(),
            payload: Map::new(),
            cache_policy: Default::default(),
            output_contract: Default::default(),
            tool_versions: Default::default(),
            retry_policy: RetryPolicy { max_attempts: 2 },
        }],
        input: json!({}),
        outputs: Value::Null,
    };

    let job = world.engine.submit(plan).await.unwrap();
    let done = wait_terminal(&world.plane, &job.job_id).await;

    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(done.steps[0].attempt, 2);

    world.engine.shutdown().await;
}

/// Scenario 3: timeout without retry budget fails the job; no restart.
#[tokio::test]
async fn timeout_fails_job_without_worker_restart() {
    let world = world();
    world.pool.script("connect", ScriptedReply::Hang);

    let receipt = world
        .plane
        .launch_recipe(
            "prepare_project",
            input(&[("project", json!("ep"))]),
            PlanOptions {
                timeout_ms: Some(100),
                ..PlanOptions::default()
            },
        )
        .await
        .unwrap();

    let done = wait_terminal(&world.plane, &receipt.job_id).await;
    assert_eq!(done.state, JobState::Failed);
    let error = done.steps[0].error.as_ref().unwrap();
    assert_eq!(error.category, ErrorCategory::Retryable);
    assert_eq!(error.message, "timeout");
    assert!(world.pool.restarts().is_empty());

    world.engine.shutdown().await;
}

/// Scenario 4: cancel mid-flight kills the media worker and cancels the job.
#[tokio::test]
async fn cancel_mid_flight_restarts_media_worker() {
    let world = world_with_cancel_delay(50);
    world.pool.script("transcribe_folder", ScriptedReply::Hang);

    let mut events = world.plane.subscribe();
    let receipt = world
        .plane
        .launch_recipe(
            "transcribe_folder",
            input(&[("folder", json!("/tmp/audio"))]),
            PlanOptions::default(),
        )
        .await
        .unwrap();

    let ack = world.plane.jobs_cancel(&receipt.job_id).await;
    assert!(ack.ok);
    assert_eq!(ack.message, "cancellation requested");

    let flagged = world.plane.jobs_get(&receipt.job_id).await.unwrap();
    assert!(flagged.steps[0].cancellation.requested);

    let done = wait_terminal(&world.plane, &receipt.job_id).await;
    assert_eq!(done.state, JobState::Canceled);
    assert_eq!(done.steps[0].state, StepState::Canceled);
    assert_eq!(
        world.pool.restarts(),
        vec![(Worker::Media, "canceled by user".to_string())]
    );

    // WORKER_AVAILABLE follows the restart.
    tokio::time::sleep(Duration::from_millis(30)).await;
    let mut available = false;
    while let Ok(event) = events.try_recv() {
        if matches!(
            &event,
            ep_core::EngineEvent::WorkerStatus { worker: Worker::Media, code, .. }
                if code == ep_core::event::WORKER_AVAILABLE
        ) {
            available = true;
        }
    }
    assert!(available, "expected a WORKER_AVAILABLE event after restart");

    world.engine.shutdown().await;
}

/// Scenario 5: media concurrency clamp across five competing jobs.
#[tokio::test]
async fn five_media_jobs_respect_concurrency_two() {
    let world = world();
    for _ in 0..5 {
        world.pool.script("transcribe_folder", ScriptedReply::Hang);
    }

    for i in 0..5 {
        world
            .plane
            .launch_recipe(
                "transcribe_folder",
                input(&[("folder", json!(format!("/tmp/audio-{i}")))]),
                PlanOptions::default(),
            )
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    let jobs = world.plane.jobs_list().await;
    let running = jobs
        .iter()
        .flat_map(|j| &j.steps)
        .filter(|s| s.state == StepState::Running)
        .count();
    let waiting = jobs
        .iter()
        .flat_map(|j| &j.steps)
        .filter(|s| s.state == StepState::Dispatching)
        .count();
    assert_eq!(running, 2);
    assert_eq!(waiting, 3);

    world.engine.shutdown().await;
}

/// Scenario 6: idempotent submit through the launch path.
#[tokio::test]
async fn idempotent_launch_collapses_to_one_job() {
    let world = world();

    let options = || PlanOptions {
        idempotency_key: Some("launch-once".to_string()),
        ..PlanOptions::default()
    };
    let first = world
        .plane
        .launch_recipe("prepare_project", input(&[("project", json!("ep"))]), options())
        .await
        .unwrap();
    let second = world
        .plane
        .launch_recipe("prepare_project", input(&[("project", json!("ep"))]), options())
        .await
        .unwrap();

    assert_eq!(first.job_id, second.job_id);
    assert_eq!(world.plane.jobs_list().await.len(), 1);

    world.engine.shutdown().await;
}

/// Preferences drive the engine's concurrency at runtime.
#[tokio::test]
async fn concurrency_preference_applies_immediately() {
    let world = world();
    for _ in 0..4 {
        world.pool.script("transcribe_folder", ScriptedReply::Hang);
    }
    for i in 0..4 {
        world
            .plane
            .launch_recipe(
                "transcribe_folder",
                input(&[("folder", json!(format!("/tmp/a{i}")))]),
                PlanOptions::default(),
            )
            .await
            .unwrap();
    }

    world
        .plane
        .update_preferences(PrefsPatch {
            recipe_defaults: None,
            worker_concurrency: Some([(Worker::Media, 4)].into_iter().collect()),
        })
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let running = world
        .plane
        .jobs_list()
        .await
        .iter()
        .flat_map(|j| j.steps.clone())
        .filter(|s| s.state == StepState::Running)
        .count();
    assert_eq!(running, 4);

    world.engine.shutdown().await;
}

/// The dashboard reflects a full run after the fact.
#[tokio::test]
async fn dashboard_snapshot_after_completion() {
    let world = world();
    let receipt = world
        .plane
        .launch_recipe(
            "prepare_project",
            input(&[("project", json!("ep"))]),
            PlanOptions::default(),
        )
        .await
        .unwrap();
    wait_terminal(&world.plane, &receipt.job_id).await;

    let rows = world.plane.dashboard_snapshot().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].state, JobState::Succeeded);
    assert!(rows[0].active_step.is_none());
    assert_eq!(rows[0].preset_id, "prepare_project");

    world.engine.shutdown().await;
}
