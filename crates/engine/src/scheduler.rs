// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduler actor: sole owner of the job index.
//!
//! Scheduling discipline: a step is runnable when it is queued and every
//! dependency has succeeded. Runnable steps consult the cache first, then
//! move to the owning worker's FIFO; draining respects the per-worker
//! concurrency limit. All transitions are journaled and fanned out.

use crate::engine::{CancelAck, EngineConfig, EngineMsg};
use ep_cache::CacheStore;
use ep_core::{
    Clock, EngineEvent, IdGen, Job, JobId, JobState, StepId, StepState, Worker, WorkerFailure,
};
use ep_proto::{RequestEnvelope, TraceId};
use ep_recipes::Plan;
use ep_storage::{HydratedJobs, JobJournal};
use ep_supervisor::WorkerPool;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

pub(crate) struct SchedulerState<P, C, G> {
    config: EngineConfig,
    pool: Arc<P>,
    clock: C,
    id_gen: G,
    journal: JobJournal,
    cache: CacheStore,
    jobs: HashMap<JobId, Job>,
    /// Creation order, for listings.
    order: Vec<JobId>,
    idempotency: HashMap<String, JobId>,
    /// Per-worker FIFO of dispatching steps.
    queues: HashMap<Worker, VecDeque<(JobId, StepId)>>,
    /// Steps currently running per worker.
    active: HashMap<Worker, u32>,
    concurrency: HashMap<Worker, u32>,
    events: broadcast::Sender<EngineEvent>,
    msg_tx: mpsc::Sender<EngineMsg>,
}

impl<P, C, G> SchedulerState<P, C, G>
where
    P: WorkerPool,
    C: Clock,
    G: IdGen + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: EngineConfig,
        pool: Arc<P>,
        clock: C,
        id_gen: G,
        journal: JobJournal,
        cache: CacheStore,
        events: broadcast::Sender<EngineEvent>,
        msg_tx: mpsc::Sender<EngineMsg>,
    ) -> Self {
        let concurrency = config.concurrency.clone();
        Self {
            config,
            pool,
            clock,
            id_gen,
            journal,
            cache,
            jobs: HashMap::new(),
            order: Vec::new(),
            idempotency: HashMap::new(),
            queues: HashMap::new(),
            active: HashMap::new(),
            concurrency,
            events,
            msg_tx,
        }
    }

    pub(crate) fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    /// Install recovered jobs and apply the resume policy.
    ///
    /// Non-terminal jobs are re-enqueued; their `running`/`dispatching`
    /// steps are demoted to `queued` with cleared timestamps. Steps whose
    /// cancellation was already requested resolve to `canceled` instead of
    /// resuming. Returns the job ids to reschedule.
    pub(crate) fn hydrate(&mut self, hydrated: HydratedJobs) -> Vec<JobId> {
        let now = self.clock.epoch_ms();
        let mut jobs: Vec<Job> = hydrated.jobs.into_values().collect();
        jobs.sort_by_key(|j| j.created_at_ms);

        let mut resumable = Vec::new();
        for mut job in jobs {
            if !job.state.is_terminal() {
                for step in &mut job.steps {
                    if step.state.is_terminal() {
                        continue;
                    }
                    if step.cancellation.requested {
                        step.state = StepState::Canceled;
                        step.finished_at_ms = Some(now);
                        step.error = Some(WorkerFailure::user("canceled"));
                    } else if matches!(step.state, StepState::Running | StepState::Dispatching) {
                        step.state = StepState::Queued;
                        step.started_at_ms = None;
                        step.finished_at_ms = None;
                    }
                }
                resumable.push(job.job_id.clone());
            }
            if let Some(key) = &job.idempotency_key {
                self.idempotency.insert(key.clone(), job.job_id.clone());
            }
            self.order.push(job.job_id.clone());
            self.jobs.insert(job.job_id.clone(), job);
        }

        if !self.jobs.is_empty() {
            tracing::info!(
                jobs = self.jobs.len(),
                resumable = resumable.len(),
                "hydrated job journal"
            );
        }
        resumable
    }

    /// The actor loop. Resumable jobs are scheduled before the first message.
    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<EngineMsg>, resumable: Vec<JobId>) {
        for job_id in &resumable {
            self.schedule(job_id);
        }

        while let Some(msg) = rx.recv().await {
            match msg {
                EngineMsg::Submit { plan, reply } => {
                    let job = self.submit(plan);
                    let _ = reply.send(job);
                }
                EngineMsg::Cancel { job_id, reply } => {
                    let ack = self.cancel(&job_id);
                    let _ = reply.send(ack);
                }
                EngineMsg::StepResult {
                    job_id,
                    step_id,
                    attempt,
                    result,
                } => self.step_result(job_id, step_id, attempt, result),
                EngineMsg::CancelKill { job_id, step_id } => self.cancel_kill(&job_id, &step_id),
                EngineMsg::SetConcurrency { concurrency } => {
                    for (worker, limit) in concurrency {
                        self.concurrency.insert(worker, limit.max(1));
                    }
                    for worker in Worker::ALL {
                        self.drain(worker);
                    }
                }
                EngineMsg::Jobs { reply } => {
                    let jobs = self
                        .order
                        .iter()
                        .filter_map(|id| self.jobs.get(id).cloned())
                        .collect();
                    let _ = reply.send(jobs);
                }
                EngineMsg::GetJob { job_id, reply } => {
                    let _ = reply.send(self.jobs.get(&job_id).cloned());
                }
                EngineMsg::InvalidateCache { fingerprint, reply } => {
                    let result = self
                        .cache
                        .invalidate(fingerprint.as_deref())
                        .map_err(|e| e.to_string());
                    let _ = reply.send(result);
                }
                EngineMsg::Shutdown { reply } => {
                    let _ = reply.send(());
                    break;
                }
            }
        }
        tracing::info!("scheduler stopped");
    }

    /// Accept a plan: de-duplicate on the idempotency key, materialize the
    /// job, persist, announce, schedule.
    fn submit(&mut self, plan: Plan) -> Job {
        if let Some(existing) = plan
            .idempotency_key
            .as_ref()
            .and_then(|key| self.idempotency.get(key))
            .and_then(|id| self.jobs.get(id))
        {
            tracing::info!(job = %existing.job_id, "submit de-duplicated by idempotency key");
            return existing.clone();
        }

        let now = self.clock.epoch_ms();
        let job_id = JobId::new(self.id_gen.next());
        let steps = plan
            .steps
            .iter()
            .map(|s| ep_core::StepRecord {
                step_id: s.step_id.clone(),
                cmd: s.cmd.clone(),
                worker: s.worker,
                payload: Value::Object(s.payload.clone()),
                depends_on: s.depends_on.clone(),
                state: StepState::Queued,
                attempt: 0,
                started_at_ms: None,
                finished_at_ms: None,
                output: None,
                error: None,
                cancellation: Default::default(),
                cache_policy: s.cache_policy,
                output_contract: s.output_contract,
                tool_versions: s.tool_versions.clone(),
                retry_policy: s.retry_policy,
            })
            .collect();

        let job = Job {
            job_id: job_id.clone(),
            preset_id: plan.preset_id,
            idempotency_key: plan.idempotency_key,
            state: JobState::Queued,
            created_at_ms: now,
            started_at_ms: None,
            finished_at_ms: None,
            steps,
            outputs: Vec::new(),
            outputs_template: plan.outputs,
            errors: Vec::new(),
            input: plan.input,
            retry_policy: plan.retry_policy,
            timeout_ms: plan.timeout_ms,
        };

        if let Some(key) = &job.idempotency_key {
            self.idempotency.insert(key.clone(), job_id.clone());
        }
        // Pre-schedule snapshot, as a fallback for the return below.
        let snapshot = job.clone();
        self.order.push(job_id.clone());
        self.jobs.insert(job_id.clone(), job);

        self.persist(&job_id);
        self.emit(EngineEvent::JobState {
            job_id: job_id.clone(),
            state: JobState::Queued,
            timing_ms: None,
        });

        self.schedule(&job_id);
        // Snapshot after the first scheduling pass.
        self.jobs.get(&job_id).cloned().unwrap_or(snapshot)
    }

    /// One scheduling pass over a job: cache hits resolve immediately,
    /// other runnable steps move onto their worker's FIFO. Ends with a
    /// drain and the finalization check.
    fn schedule(&mut self, job_id: &JobId) {
        loop {
            let runnable: Vec<StepId> = {
                let Some(job) = self.jobs.get(job_id) else { return };
                if job.state.is_terminal() {
                    break;
                }
                job.steps
                    .iter()
                    .filter(|s| s.state == StepState::Queued && !s.cancellation.requested)
                    .filter(|s| s.deps_satisfied(|d| job.step_succeeded(d)))
                    .map(|s| s.step_id.clone())
                    .collect()
            };
            if runnable.is_empty() {
                break;
            }

            let mut progressed = false;
            for step_id in runnable {
                self.mark_job_running(job_id);
                if self.try_cache_hit(job_id, &step_id) {
                    // A cache hit may unblock dependents this same pass.
                    progressed = true;
                } else {
                    self.enqueue_step(job_id, &step_id);
                }
            }
            if !progressed {
                break;
            }
        }

        for worker in Worker::ALL {
            self.drain(worker);
        }
        self.finalize(job_id);
    }

    /// Stamp `running`/`started_at` once, the first time a step schedules.
    fn mark_job_running(&mut self, job_id: &JobId) {
        let now = self.clock.epoch_ms();
        let event = {
            let Some(job) = self.jobs.get_mut(job_id) else { return };
            if job.state != JobState::Queued {
                return;
            }
            job.state = JobState::Running;
            job.started_at_ms = Some(now);
            EngineEvent::JobState {
                job_id: job.job_id.clone(),
                state: JobState::Running,
                timing_ms: None,
            }
        };
        self.persist(job_id);
        self.emit(event);
    }

    /// Consult the step cache; on a contract-satisfying hit, mark the step
    /// succeeded without a worker call (attempt stays 0).
    fn try_cache_hit(&mut self, job_id: &JobId, step_id: &StepId) -> bool {
        let now = self.clock.epoch_ms();
        let (fp, output) = {
            let Some(step) = self.jobs.get(job_id).and_then(|j| j.step(step_id)) else {
                return false;
            };
            if !step.cache_policy.enabled {
                return false;
            }
            let payload = step.payload.as_object().cloned().unwrap_or_default();
            let sources = ep_cache::signatures_for_payload(&payload);
            let fp = ep_cache::fingerprint(&step.cmd, &payload, &sources, &step.tool_versions);
            let Some(entry) = self.cache.get(&fp, step.cache_policy.ttl_ms, now) else {
                return false;
            };
            if ep_cache::validate_contract(step.output_contract, Some(&entry.output)).is_err() {
                return false;
            }
            (fp, entry.output.clone())
        };

        let event = {
            let Some(job) = self.jobs.get_mut(job_id) else { return false };
            let Some(step) = job.step_mut(step_id) else { return false };
            step.state = StepState::Succeeded;
            step.started_at_ms = Some(now);
            step.finished_at_ms = Some(now);
            step.output = Some(output);
            EngineEvent::StepProgress {
                job_id: job_id.clone(),
                step_id: step.step_id.clone(),
                worker: step.worker,
                state: StepState::Succeeded,
                code: Some("CACHE_HIT".to_string()),
                output: step.output.clone(),
                error: None,
                timing_ms: Some(0),
            }
        };

        tracing::info!(job = %job_id, step = %step_id, fingerprint = %fp, "step satisfied from cache");
        self.persist(job_id);
        self.emit(event);
        true
    }

    /// Move a runnable step onto its worker's FIFO.
    fn enqueue_step(&mut self, job_id: &JobId, step_id: &StepId) {
        let worker = {
            let Some(job) = self.jobs.get_mut(job_id) else { return };
            let Some(step) = job.step_mut(step_id) else { return };
            step.state = StepState::Dispatching;
            step.worker
        };
        self.queues
            .entry(worker)
            .or_default()
            .push_back((job_id.clone(), step_id.clone()));
        self.persist(job_id);
    }

    /// Pop dispatching steps while the worker has free slots.
    fn drain(&mut self, worker: Worker) {
        loop {
            let limit = self.concurrency.get(&worker).copied().unwrap_or(1).max(1);
            let active = self.active.get(&worker).copied().unwrap_or(0);
            if active >= limit {
                return;
            }
            let Some((job_id, step_id)) = self
                .queues
                .get_mut(&worker)
                .and_then(|q| q.pop_front())
            else {
                return;
            };
            // Entries may have been canceled while queued.
            let dispatching = self
                .jobs
                .get(&job_id)
                .and_then(|j| j.step(&step_id))
                .map(|s| s.state == StepState::Dispatching)
                .unwrap_or(false);
            if !dispatching {
                continue;
            }
            self.run_step(&job_id, &step_id);
        }
    }

    /// Mark a step running and fire its request in a spawned task. The
    /// task reports back through the mailbox; it never touches job state.
    fn run_step(&mut self, job_id: &JobId, step_id: &StepId) {
        let now = self.clock.epoch_ms();
        let (envelope, worker, timeout_ms, attempt, event) = {
            let Some(job) = self.jobs.get_mut(job_id) else { return };
            let timeout_ms = job.timeout_ms;
            let Some(step) = job.step_mut(step_id) else { return };
            step.state = StepState::Running;
            step.attempt += 1;
            step.started_at_ms = Some(now);
            step.finished_at_ms = None;

            let trace = TraceId::new(format!("{}:{}:{}", job_id, step.step_id, step.attempt));
            let payload = step.payload.as_object().cloned().unwrap_or_default();
            let envelope = RequestEnvelope::new(step.worker, step.cmd.clone(), payload, trace);
            let event = EngineEvent::StepProgress {
                job_id: job_id.clone(),
                step_id: step.step_id.clone(),
                worker: step.worker,
                state: StepState::Running,
                code: None,
                output: None,
                error: None,
                timing_ms: None,
            };
            (envelope, step.worker, timeout_ms, step.attempt, event)
        };

        *self.active.entry(worker).or_insert(0) += 1;
        self.persist(job_id);
        self.emit(event);

        let pool = Arc::clone(&self.pool);
        let tx = self.msg_tx.clone();
        let job_id = job_id.clone();
        let step_id = step_id.clone();
        tokio::spawn(async move {
            // Router validation guards every dispatch: a misrouted command
            // or schema violation fails the step as a user error.
            let result = match envelope.validate() {
                Err(ep_proto::ProtoError::Invalid(failure)) => Err(failure),
                Err(other) => Err(WorkerFailure::user(other.to_string())),
                Ok(()) => {
                    let request = pool.send_request(envelope);
                    if timeout_ms > 0 {
                        match tokio::time::timeout(Duration::from_millis(timeout_ms), request).await
                        {
                            Ok(Ok(resp)) => Ok(resp.data.unwrap_or(Value::Null)),
                            Ok(Err(failure)) => Err(failure),
                            Err(_) => Err(WorkerFailure::retryable("timeout")),
                        }
                    } else {
                        match request.await {
                            Ok(resp) => Ok(resp.data.unwrap_or(Value::Null)),
                            Err(failure) => Err(failure),
                        }
                    }
                }
            };
            let _ = tx
                .send(EngineMsg::StepResult {
                    job_id,
                    step_id,
                    attempt,
                    result,
                })
                .await;
        });
    }

    /// Apply a finished step run: success, cancel-race, retry, or failure.
    fn step_result(
        &mut self,
        job_id: JobId,
        step_id: StepId,
        attempt: u32,
        result: Result<Value, WorkerFailure>,
    ) {
        let now = self.clock.epoch_ms();

        let worker = self
            .jobs
            .get(&job_id)
            .and_then(|j| j.step(&step_id))
            .map(|s| s.worker);
        if let Some(w) = worker {
            if let Some(a) = self.active.get_mut(&w) {
                *a = a.saturating_sub(1);
            }
        }

        let mut event = None;
        let mut cache_write = None;
        {
            let Some(job) = self.jobs.get_mut(&job_id) else { return };
            let mut job_error = None;
            if let Some(step) = job.step_mut(&step_id) {
                if step.state == StepState::Running && step.attempt == attempt {
                    let contract = step.output_contract;
                    let outcome = result.and_then(|output| {
                        ep_cache::validate_contract(contract, Some(&output)).map(|()| output)
                    });
                    match outcome {
                        Ok(output) => {
                            step.state = StepState::Succeeded;
                            step.finished_at_ms = Some(now);
                            step.error = None;
                            step.output = Some(output.clone());
                            if step.cache_policy.enabled {
                                cache_write = Some((
                                    step.cmd.clone(),
                                    step.payload.as_object().cloned().unwrap_or_default(),
                                    step.tool_versions.clone(),
                                    output,
                                ));
                            }
                        }
                        Err(failure) => {
                            if step.cancellation.requested {
                                step.state = StepState::Canceled;
                                step.finished_at_ms = Some(now);
                                step.error = Some(WorkerFailure::user("canceled"));
                            } else if failure.is_retryable()
                                && step.attempt < step.retry_policy.max_attempts
                            {
                                tracing::info!(
                                    job = %job_id,
                                    step = %step_id,
                                    attempt,
                                    error = %failure,
                                    "step failed, returning to queue"
                                );
                                step.state = StepState::Queued;
                                step.error = Some(failure);
                                step.started_at_ms = None;
                                step.finished_at_ms = None;
                            } else {
                                step.state = StepState::Failed;
                                step.finished_at_ms = Some(now);
                                step.error = Some(failure.clone());
                                job_error = Some(failure);
                            }
                        }
                    }
                    if step.state.is_terminal() {
                        event = Some(EngineEvent::StepProgress {
                            job_id: job_id.clone(),
                            step_id: step.step_id.clone(),
                            worker: step.worker,
                            state: step.state,
                            code: None,
                            output: step.output.clone(),
                            error: step.error.clone(),
                            timing_ms: step.timing_ms(),
                        });
                    }
                } else {
                    tracing::debug!(job = %job_id, step = %step_id, attempt, "stale step result ignored");
                }
            }
            if let Some(failure) = job_error {
                job.errors.push(failure);
            }
        }

        self.persist(&job_id);
        if let Some(e) = event {
            self.emit(e);
        }
        if let Some((cmd, payload, versions, output)) = cache_write {
            let sources = ep_cache::signatures_for_payload(&payload);
            let fp = ep_cache::fingerprint(&cmd, &payload, &sources, &versions);
            if let Err(e) = self.cache.set(&fp, output, now) {
                tracing::warn!(error = %e, "failed to write step cache");
            }
        }
        self.schedule(&job_id);
    }

    /// Request cancellation of a job.
    ///
    /// Queued and dispatching steps cancel immediately; running steps are
    /// flagged, and a forced worker kill is scheduled after the configured
    /// delay (the worker has no cooperative cancel channel).
    fn cancel(&mut self, job_id: &JobId) -> CancelAck {
        let now = self.clock.epoch_ms();
        let (events, kills) = {
            let Some(job) = self.jobs.get_mut(job_id) else {
                return CancelAck {
                    ok: false,
                    message: "job not found".to_string(),
                };
            };
            if job.state.is_terminal() {
                // Already settled: acknowledge without re-emitting anything.
                return CancelAck {
                    ok: true,
                    message: "cancellation requested".to_string(),
                };
            }

            let mut events = Vec::new();
            let mut kills = Vec::new();
            for step in &mut job.steps {
                match step.state {
                    StepState::Queued | StepState::Dispatching => {
                        step.cancellation.requested = true;
                        step.state = StepState::Canceled;
                        step.finished_at_ms = Some(now);
                        step.error = Some(WorkerFailure::user("canceled"));
                        events.push(EngineEvent::StepProgress {
                            job_id: job_id.clone(),
                            step_id: step.step_id.clone(),
                            worker: step.worker,
                            state: StepState::Canceled,
                            code: None,
                            output: None,
                            error: step.error.clone(),
                            timing_ms: None,
                        });
                    }
                    StepState::Running if !step.cancellation.requested => {
                        step.cancellation.requested = true;
                        kills.push(step.step_id.clone());
                    }
                    _ => {}
                }
            }
            (events, kills)
        };

        self.persist(job_id);
        for event in events {
            self.emit(event);
        }

        for step_id in kills {
            let tx = self.msg_tx.clone();
            let delay = self.config.cancel_kill_delay;
            let job_id = job_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(EngineMsg::CancelKill { job_id, step_id }).await;
            });
        }

        self.schedule(job_id);
        CancelAck {
            ok: true,
            message: "cancellation requested".to_string(),
        }
    }

    /// The cancel-kill timer fired: if the step is still in flight, ask
    /// the supervisor to hard-restart the worker (the only interrupt
    /// mechanism available). The flush then resolves the step.
    fn cancel_kill(&mut self, job_id: &JobId, step_id: &StepId) {
        let worker = self
            .jobs
            .get(job_id)
            .and_then(|j| j.step(step_id))
            .filter(|s| s.state == StepState::Running && s.cancellation.requested)
            .map(|s| s.worker);
        let Some(worker) = worker else { return };

        tracing::info!(job = %job_id, step = %step_id, worker = %worker, "forcing worker restart for canceled step");
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            pool.restart(worker, "canceled by user").await;
        });
    }

    /// Decide the job's terminal state, if any. Idempotent: a terminal job
    /// is never re-finalized.
    fn finalize(&mut self, job_id: &JobId) {
        let now = self.clock.epoch_ms();
        let event = {
            let Some(job) = self.jobs.get_mut(job_id) else { return };
            if job.state.is_terminal() {
                return;
            }

            let any_failed = job.steps.iter().any(|s| s.state == StepState::Failed);
            let any_canceled = job.steps.iter().any(|s| s.state == StepState::Canceled);
            let all_succeeded = job.steps.iter().all(|s| s.state == StepState::Succeeded);
            let next = if any_failed {
                JobState::Failed
            } else if any_canceled {
                JobState::Canceled
            } else if all_succeeded {
                JobState::Succeeded
            } else {
                return;
            };

            job.state = next;
            job.finished_at_ms = Some(now);

            if next == JobState::Succeeded && !job.outputs_template.is_null() {
                let mut steps_ctx = serde_json::Map::new();
                for step in &job.steps {
                    steps_ctx.insert(
                        step.step_id.as_str().to_string(),
                        json!({"output": step.output.clone().unwrap_or(Value::Null)}),
                    );
                }
                let ctx = json!({
                    "recipe": {"id": job.preset_id},
                    "input": job.input,
                    "steps": steps_ctx,
                });
                let materialized = ep_recipes::interpolate(&job.outputs_template, &ctx);
                job.outputs.push(materialized);
            }

            EngineEvent::JobState {
                job_id: job.job_id.clone(),
                state: next,
                timing_ms: job.timing_ms(),
            }
        };

        self.persist(job_id);
        self.emit(event);
    }

    /// Journal the current snapshot of a job. Persistence failures are
    /// logged, not fatal: the in-memory index stays authoritative.
    fn persist(&mut self, job_id: &JobId) {
        let Some(job) = self.jobs.get(job_id) else { return };
        let ts = self.clock.epoch_ms();
        if let Err(e) = self.journal.append(job, ts) {
            tracing::error!(job = %job_id, error = %e, "failed to journal job snapshot");
        }
    }

    fn emit(&self, event: EngineEvent) {
        tracing::info!("{}", event.log_summary());
        let _ = self.events.send(event);
    }
}
