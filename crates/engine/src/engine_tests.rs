// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ep_core::{
    CachePolicy, ContractKind, ErrorCategory, FakeClock, JobState, RetryPolicy, SequentialIdGen,
    StepState,
};
use ep_recipes::PlanStep;
use ep_supervisor::{FakePool, ScriptedReply};
use serde_json::json;
use tempfile::TempDir;

fn plan_step(id: &str, cmd: &str, worker: Worker) -> PlanStep {
    // Satisfy each command's required payload schema.
    let payload = match cmd {
        "transcribe_folder" => json!({"folder_path": "/tmp/audio"}),
        "transcribe" => json!({"file": "/tmp/audio/a.wav"}),
        "leaderpass_upload" => json!({"file_path": "/tmp/out.mov"}),
        _ => json!({}),
    };
    let payload = match payload {
        serde_json::Value::Object(m) => m,
        _ => serde_json::Map::new(),
    };
    PlanStep {
        step_id: StepId::new(id),
        worker,
        cmd: cmd.to_string(),
        depends_on: Vec::new(),
        payload,
        cache_policy: CachePolicy::default(),
        output_contract: ContractKind::NonNull,
        tool_versions: Default::default(),
        retry_policy: RetryPolicy::default(),
    }
}

fn single_step_plan(cmd: &str, worker: Worker) -> Plan {
    Plan {
        preset_id: "probe".to_string(),
        idempotency_key: None,
        timeout_ms: 0,
        retry_policy: RetryPolicy::default(),
        steps: vec![plan_step("s1", cmd, worker)],
        input: json!({}),
        outputs: serde_json::Value::Null,
    }
}

fn start_engine(dir: &TempDir, pool: Arc<FakePool>, cancel_delay_ms: u64) -> Engine {
    let mut config = EngineConfig::new(
        dir.path().join("journal.jsonl"),
        dir.path().join("cache.json"),
    );
    config.cancel_kill_delay = Duration::from_millis(cancel_delay_ms);
    Engine::start(config, pool, FakeClock::new(), SequentialIdGen::new("job")).unwrap()
}

async fn wait_terminal(engine: &Engine, job_id: &JobId) -> Job {
    for _ in 0..500 {
        if let Some(job) = engine.job(job_id).await {
            if job.is_terminal() {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("job {job_id} did not reach a terminal state");
}

fn drain_events(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// =============================================================================
// happy path
// =============================================================================

#[tokio::test]
async fn single_step_happy_path() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    pool.script_ok(
        "transcribe_folder",
        json!({
            "outputs": [{"file": "/tmp/audio/a.wav", "output_paths": ["/tmp/audio/a.txt"]}],
            "files_processed": 1,
        }),
    );
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);
    let mut events = engine.subscribe();

    let mut plan = single_step_plan("transcribe_folder", Worker::Media);
    plan.outputs = json!({"result": "${steps.s1.output.files_processed}"});
    let job = engine.submit(plan).await.unwrap();

    let done = wait_terminal(&engine, &job.job_id).await;
    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(done.steps[0].state, StepState::Succeeded);
    assert_eq!(done.steps[0].attempt, 1);
    assert_eq!(done.outputs.len(), 1);
    assert_eq!(done.outputs[0]["result"], 1);

    // queued → running → (step running, step succeeded) → succeeded, once each.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let events = drain_events(&mut events);
    let job_states: Vec<JobState> = events
        .iter()
        .filter_map(|e| match e {
            EngineEvent::JobState { state, .. } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        job_states,
        vec![JobState::Queued, JobState::Running, JobState::Succeeded]
    );

    engine.shutdown().await;
}

// =============================================================================
// retries and error categories
// =============================================================================

#[tokio::test]
async fn retryable_failure_retries_then_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    pool.script(
        "transcribe_folder",
        ScriptedReply::Err(ep_core::WorkerFailure::retryable("temporary")),
    );
    pool.script_ok("transcribe_folder", json!({"files_processed": 1}));
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);

    let mut plan = single_step_plan("transcribe_folder", Worker::Media);
    plan.steps[0].retry_policy = RetryPolicy { max_attempts: 2 };
    let job = engine.submit(plan).await.unwrap();

    let done = wait_terminal(&engine, &job.job_id).await;
    assert_eq!(done.state, JobState::Succeeded);
    assert_eq!(done.steps[0].attempt, 2);
    assert_eq!(pool.calls_for("transcribe_folder").len(), 2);

    engine.shutdown().await;
}

#[tokio::test]
async fn user_error_is_never_retried() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    pool.script(
        "transcribe_folder",
        ScriptedReply::Err(ep_core::WorkerFailure::user("missing required field: folder_path")),
    );
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);

    let mut plan = single_step_plan("transcribe_folder", Worker::Media);
    plan.steps[0].retry_policy = RetryPolicy { max_attempts: 3 };
    let job = engine.submit(plan).await.unwrap();

    let done = wait_terminal(&engine, &job.job_id).await;
    assert_eq!(done.state, JobState::Failed);
    assert_eq!(done.steps[0].attempt, 1);
    assert_eq!(pool.calls_for("transcribe_folder").len(), 1);
    assert_eq!(done.errors[0].category, ErrorCategory::User);

    engine.shutdown().await;
}

#[tokio::test]
async fn fatal_error_fails_despite_retry_budget() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    pool.script(
        "leaderpass_upload",
        ScriptedReply::Err(ep_core::WorkerFailure::fatal("permanent configuration error")),
    );
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);

    let mut plan = single_step_plan("leaderpass_upload", Worker::Platform);
    plan.steps[0].retry_policy = RetryPolicy { max_attempts: 5 };
    let job = engine.submit(plan).await.unwrap();

    let done = wait_terminal(&engine, &job.job_id).await;
    assert_eq!(done.state, JobState::Failed);
    assert_eq!(done.steps[0].attempt, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn timeout_fails_step_without_restarting_worker() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    pool.script("transcribe_folder", ScriptedReply::Hang);
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);

    let mut plan = single_step_plan("transcribe_folder", Worker::Media);
    plan.timeout_ms = 100;
    let job = engine.submit(plan).await.unwrap();

    let done = wait_terminal(&engine, &job.job_id).await;
    assert_eq!(done.state, JobState::Failed);
    let error = done.steps[0].error.as_ref().unwrap();
    assert_eq!(error.category, ErrorCategory::Retryable);
    assert_eq!(error.message, "timeout");
    // Only the cancel path restarts workers.
    assert!(pool.restarts().is_empty());

    engine.shutdown().await;
}

// =============================================================================
// DAG discipline
// =============================================================================

#[tokio::test]
async fn dependencies_run_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);

    let mut plan = single_step_plan("connect", Worker::Resolve);
    let mut second = plan_step("s2", "context", Worker::Resolve);
    second.depends_on = vec![StepId::new("s1")];
    plan.steps.push(second);
    let job = engine.submit(plan).await.unwrap();

    let done = wait_terminal(&engine, &job.job_id).await;
    assert_eq!(done.state, JobState::Succeeded);

    let cmds: Vec<String> = pool.calls().iter().map(|e| e.cmd.clone()).collect();
    assert_eq!(cmds, vec!["connect", "context"]);

    engine.shutdown().await;
}

#[tokio::test]
async fn failed_dependency_leaves_dependent_queued() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    pool.script(
        "connect",
        ScriptedReply::Err(ep_core::WorkerFailure::user("no host")),
    );
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);

    let mut plan = single_step_plan("connect", Worker::Resolve);
    let mut second = plan_step("s2", "context", Worker::Resolve);
    second.depends_on = vec![StepId::new("s1")];
    plan.steps.push(second);
    let job = engine.submit(plan).await.unwrap();

    let done = wait_terminal(&engine, &job.job_id).await;
    assert_eq!(done.state, JobState::Failed);
    assert_eq!(done.steps[0].state, StepState::Failed);
    // Terminal job, but the dependent step is left queued (history shows
    // it never ran).
    assert_eq!(done.steps[1].state, StepState::Queued);
    assert_eq!(done.steps[1].attempt, 0);

    engine.shutdown().await;
}

// =============================================================================
// concurrency
// =============================================================================

#[tokio::test]
async fn media_concurrency_is_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    for _ in 0..5 {
        pool.script("transcribe_folder", ScriptedReply::Hang);
    }
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);

    let mut ids = Vec::new();
    for _ in 0..5 {
        let job = engine
            .submit(single_step_plan("transcribe_folder", Worker::Media))
            .await
            .unwrap();
        ids.push(job.job_id);
    }

    tokio::time::sleep(Duration::from_millis(30)).await;
    let jobs = engine.jobs().await;
    let running = jobs
        .iter()
        .flat_map(|j| &j.steps)
        .filter(|s| s.state == StepState::Running)
        .count();
    let parked = jobs
        .iter()
        .flat_map(|j| &j.steps)
        .filter(|s| s.state == StepState::Dispatching)
        .count();
    assert_eq!(running, 2, "media concurrency defaults to 2");
    assert_eq!(parked, 3);

    engine.shutdown().await;
}

#[tokio::test]
async fn raising_concurrency_drains_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    for _ in 0..5 {
        pool.script("transcribe_folder", ScriptedReply::Hang);
    }
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);
    for _ in 0..5 {
        engine
            .submit(single_step_plan("transcribe_folder", Worker::Media))
            .await
            .unwrap();
    }

    engine
        .set_concurrency([(Worker::Media, 4)].into_iter().collect())
        .await;
    tokio::time::sleep(Duration::from_millis(30)).await;

    let jobs = engine.jobs().await;
    let running = jobs
        .iter()
        .flat_map(|j| &j.steps)
        .filter(|s| s.state == StepState::Running)
        .count();
    assert_eq!(running, 4);

    engine.shutdown().await;
}

// =============================================================================
// idempotent submit
// =============================================================================

#[tokio::test]
async fn repeated_idempotency_key_returns_same_job() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);

    let mut plan = single_step_plan("connect", Worker::Resolve);
    plan.idempotency_key = Some("once".to_string());
    let first = engine.submit(plan.clone()).await.unwrap();
    let second = engine.submit(plan).await.unwrap();

    assert_eq!(first.job_id, second.job_id);
    assert_eq!(engine.jobs().await.len(), 1);

    engine.shutdown().await;
}

// =============================================================================
// cancellation
// =============================================================================

#[tokio::test]
async fn cancel_running_step_restarts_worker_and_cancels_job() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    pool.script("transcribe_folder", ScriptedReply::Hang);
    let engine = start_engine(&dir, Arc::clone(&pool), 50);
    let mut events = engine.subscribe();

    let job = engine
        .submit(single_step_plan("transcribe_folder", Worker::Media))
        .await
        .unwrap();
    assert_eq!(job.steps[0].state, StepState::Running);

    let ack = engine.cancel(&job.job_id).await;
    assert!(ack.ok);
    assert_eq!(ack.message, "cancellation requested");

    let flagged = engine.job(&job.job_id).await.unwrap();
    assert!(flagged.steps[0].cancellation.requested);

    let done = wait_terminal(&engine, &job.job_id).await;
    assert_eq!(done.state, JobState::Canceled);
    assert_eq!(done.steps[0].state, StepState::Canceled);
    assert_eq!(
        pool.restarts(),
        vec![(Worker::Media, "canceled by user".to_string())]
    );

    // Double cancel: same ack, no duplicate terminal events.
    tokio::time::sleep(Duration::from_millis(20)).await;
    let before = drain_events(&mut events);
    let ack2 = engine.cancel(&job.job_id).await;
    assert!(ack2.ok);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let after = drain_events(&mut events);
    let terminal_count = |events: &[EngineEvent]| {
        events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    EngineEvent::JobState {
                        state: JobState::Canceled,
                        ..
                    }
                )
            })
            .count()
    };
    assert_eq!(terminal_count(&before), 1);
    assert_eq!(terminal_count(&after), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn cancel_unknown_job_reports_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    let engine = start_engine(&dir, Arc::clone(&pool), 50);

    let ack = engine.cancel(&JobId::new("ghost")).await;
    assert!(!ack.ok);
    assert_eq!(ack.message, "job not found");

    engine.shutdown().await;
}

#[tokio::test]
async fn cancel_queued_steps_cancels_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    pool.script("connect", ScriptedReply::Hang);
    let engine = start_engine(&dir, Arc::clone(&pool), 50);

    // s2 depends on the hanging s1, so it is still queued at cancel time.
    let mut plan = single_step_plan("connect", Worker::Resolve);
    let mut second = plan_step("s2", "context", Worker::Resolve);
    second.depends_on = vec![StepId::new("s1")];
    plan.steps.push(second);
    let job = engine.submit(plan).await.unwrap();

    engine.cancel(&job.job_id).await;
    let snapshot = engine.job(&job.job_id).await.unwrap();
    assert_eq!(snapshot.steps[1].state, StepState::Canceled);

    let done = wait_terminal(&engine, &job.job_id).await;
    assert_eq!(done.state, JobState::Canceled);

    engine.shutdown().await;
}

// =============================================================================
// step cache
// =============================================================================

#[tokio::test]
async fn cache_hit_skips_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    pool.script_ok("transcribe_folder", json!({"files_processed": 2}));
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);
    let mut events = engine.subscribe();

    let mut plan = single_step_plan("transcribe_folder", Worker::Media);
    plan.steps[0].cache_policy = CachePolicy {
        enabled: true,
        ttl_ms: None,
    };

    let first = engine.submit(plan.clone()).await.unwrap();
    let first_done = wait_terminal(&engine, &first.job_id).await;
    assert_eq!(first_done.steps[0].attempt, 1);

    let second = engine.submit(plan).await.unwrap();
    let second_done = wait_terminal(&engine, &second.job_id).await;
    assert_eq!(second_done.state, JobState::Succeeded);
    assert_eq!(second_done.steps[0].attempt, 0, "cache hits never run");
    assert_eq!(second_done.steps[0].output.as_ref().unwrap()["files_processed"], 2);
    assert_eq!(pool.calls_for("transcribe_folder").len(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    let events = drain_events(&mut events);
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::StepProgress { code: Some(c), .. } if c == "CACHE_HIT"
    )));

    engine.shutdown().await;
}

#[tokio::test]
async fn cache_invalidation_forces_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    pool.script_ok("transcribe_folder", json!({"n": 1}));
    pool.script_ok("transcribe_folder", json!({"n": 2}));
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);

    let mut plan = single_step_plan("transcribe_folder", Worker::Media);
    plan.steps[0].cache_policy = CachePolicy {
        enabled: true,
        ttl_ms: None,
    };

    let first = engine.submit(plan.clone()).await.unwrap();
    wait_terminal(&engine, &first.job_id).await;

    engine.invalidate_cache(None).await.unwrap();

    let second = engine.submit(plan).await.unwrap();
    let done = wait_terminal(&engine, &second.job_id).await;
    assert_eq!(done.steps[0].attempt, 1);
    assert_eq!(pool.calls_for("transcribe_folder").len(), 2);

    engine.shutdown().await;
}

// =============================================================================
// persistence and resume
// =============================================================================

#[tokio::test]
async fn resume_requeues_interrupted_steps() {
    let dir = tempfile::tempdir().unwrap();

    // First engine: one finished job, one stuck mid-flight.
    let pool1 = Arc::new(FakePool::new());
    pool1.script_ok("connect", json!({"connected": true}));
    pool1.script("transcribe_folder", ScriptedReply::Hang);
    let engine1 = start_engine(&dir, Arc::clone(&pool1), 1_000);

    let finished = engine1
        .submit(single_step_plan("connect", Worker::Resolve))
        .await
        .unwrap();
    let finished = wait_terminal(&engine1, &finished.job_id).await;

    let stuck = engine1
        .submit(single_step_plan("transcribe_folder", Worker::Media))
        .await
        .unwrap();
    assert_eq!(stuck.steps[0].state, StepState::Running);
    engine1.shutdown().await;

    // Second engine over the same journal: terminal job untouched, stuck
    // step demoted and re-run.
    let pool2 = Arc::new(FakePool::new());
    pool2.script_ok("transcribe_folder", json!({"files_processed": 3}));
    let config = EngineConfig::new(
        dir.path().join("journal.jsonl"),
        dir.path().join("cache.json"),
    );
    let engine2 = Engine::start(
        config,
        Arc::clone(&pool2),
        FakeClock::new(),
        SequentialIdGen::new("job2"),
    )
    .unwrap();

    let recovered = wait_terminal(&engine2, &stuck.job_id).await;
    assert_eq!(recovered.state, JobState::Succeeded);
    assert_eq!(recovered.steps[0].attempt, 2, "one crashed run plus one resumed run");

    let kept = engine2.job(&finished.job_id).await.unwrap();
    assert_eq!(kept.state, finished.state);
    assert_eq!(kept.steps[0].output, finished.steps[0].output);

    engine2.shutdown().await;
}

#[tokio::test]
async fn resume_rebuilds_idempotency_index() {
    let dir = tempfile::tempdir().unwrap();
    let pool1 = Arc::new(FakePool::new());
    let engine1 = start_engine(&dir, Arc::clone(&pool1), 1_000);

    let mut plan = single_step_plan("connect", Worker::Resolve);
    plan.idempotency_key = Some("stable-key".to_string());
    let original = engine1.submit(plan.clone()).await.unwrap();
    wait_terminal(&engine1, &original.job_id).await;
    engine1.shutdown().await;

    let pool2 = Arc::new(FakePool::new());
    let config = EngineConfig::new(
        dir.path().join("journal.jsonl"),
        dir.path().join("cache.json"),
    );
    let engine2 = Engine::start(
        config,
        Arc::clone(&pool2),
        FakeClock::new(),
        SequentialIdGen::new("job2"),
    )
    .unwrap();

    let deduped = engine2.submit(plan).await.unwrap();
    assert_eq!(deduped.job_id, original.job_id);
    assert!(pool2.calls().is_empty(), "no new work for a known key");

    engine2.shutdown().await;
}

// =============================================================================
// worker status fan-out
// =============================================================================

#[tokio::test]
async fn pool_availability_maps_to_worker_status_events() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);
    let mut events = engine.subscribe();

    pool.start(Worker::Media).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        EngineEvent::WorkerStatus { worker, code, .. } => {
            assert_eq!(worker, Worker::Media);
            assert_eq!(code, ep_core::event::WORKER_AVAILABLE);
        }
        other => panic!("expected worker_status, got {other:?}"),
    }

    engine.shutdown().await;
}

#[tokio::test]
async fn traced_worker_events_map_to_step_progress() {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(FakePool::new());
    let engine = start_engine(&dir, Arc::clone(&pool), 1_000);
    let mut events = engine.subscribe();

    pool.emit(
        Worker::Media,
        ep_supervisor::PoolEventKind::Event(ep_proto::WorkerEvent {
            event: ep_proto::WorkerEventKind::Progress,
            trace_id: Some(ep_proto::TraceId::new("job-9:s1:1")),
            code: Some("TRANSCODE".to_string()),
            data: Some(json!({"done": 3, "total": 10})),
            error: None,
            message: None,
            metrics: None,
        }),
    );

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event {
        EngineEvent::StepProgress {
            job_id,
            step_id,
            code,
            output,
            ..
        } => {
            assert_eq!(job_id.as_str(), "job-9");
            assert_eq!(step_id.as_str(), "s1");
            assert_eq!(code.as_deref(), Some("TRANSCODE"));
            assert_eq!(output.unwrap()["done"], 3);
        }
        other => panic!("expected step_progress, got {other:?}"),
    }

    engine.shutdown().await;
}
