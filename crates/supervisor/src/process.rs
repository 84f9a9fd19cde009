// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Production worker pool over real child processes.
//!
//! One reader task per worker parses stdout lines; writes to a worker's
//! stdin are serialized behind that worker's async lock. The pending map
//! is flushed with retryable failures on exit, restart, health failure,
//! and shutdown, so no awaiter is ever left hanging.

use crate::config::{backoff_delay, SupervisorConfig};
use crate::pool::{PoolEvent, PoolEventKind, WorkerPool};
use crate::SupervisorError;
use async_trait::async_trait;
use ep_core::{Worker, WorkerFailure};
use ep_proto::{normalize_reply, RequestEnvelope, RequestId, ResponseEnvelope, TraceId, WorkerReply};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{broadcast, oneshot};

/// Broadcast capacity for pool events.
const EVENT_CAPACITY: usize = 256;

type PendingResult = Result<ResponseEnvelope, WorkerFailure>;

struct PendingEntry {
    tx: oneshot::Sender<PendingResult>,
    started_at: Instant,
    cmd: String,
}

#[derive(Default)]
struct WorkerState {
    stdin: Option<Arc<tokio::sync::Mutex<ChildStdin>>>,
    kill_tx: Option<oneshot::Sender<()>>,
    pending: HashMap<RequestId, PendingEntry>,
    crash_count: u32,
    stopping: bool,
    healthy: bool,
    /// Bumped on every spawn; stale monitor tasks compare against it.
    spawn_gen: u64,
    /// Media-only latch: a transcription request is in flight.
    transcribe_active: bool,
}

struct Inner {
    config: SupervisorConfig,
    states: Mutex<HashMap<Worker, WorkerState>>,
    events: broadcast::Sender<PoolEvent>,
}

/// Supervisor over real worker child processes.
#[derive(Clone)]
pub struct ProcessPool {
    inner: Arc<Inner>,
}

impl ProcessPool {
    pub fn new(config: SupervisorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let states = Worker::ALL
            .iter()
            .map(|w| (*w, WorkerState::default()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                config,
                states: Mutex::new(states),
                events,
            }),
        }
    }

    /// True while the media worker has a transcription request in flight.
    pub fn is_transcribing(&self) -> bool {
        let states = self.inner.states.lock();
        states
            .get(&Worker::Media)
            .map(|s| s.transcribe_active)
            .unwrap_or(false)
    }

    /// Spawn the periodic health-check task over all running workers.
    ///
    /// A failed or timed-out ping marks the worker unhealthy, flushes its
    /// pending map, and kills the process; the exit handler then schedules
    /// the restart.
    pub fn spawn_health_task(&self) -> tokio::task::JoinHandle<()> {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.inner.config.health_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                for worker in Worker::ALL {
                    if !pool.is_running(worker) {
                        continue;
                    }
                    let ping = RequestEnvelope::new(
                        worker,
                        ep_proto::PING,
                        serde_json::Map::new(),
                        TraceId::new(format!("health:{worker}")),
                    );
                    let failed = match tokio::time::timeout(
                        pool.inner.config.ping_timeout,
                        pool.send_request(ping),
                    )
                    .await
                    {
                        Ok(Ok(resp)) => !resp.ok,
                        Ok(Err(_)) | Err(_) => true,
                    };
                    if failed {
                        pool.mark_unhealthy(worker, "health check failed").await;
                    }
                }
            }
        })
    }

    fn emit(&self, worker: Worker, kind: PoolEventKind) {
        let _ = self.inner.events.send(PoolEvent { worker, kind });
    }

    /// Flush every pending request with `failure`.
    fn flush_pending(&self, worker: Worker, failure: &WorkerFailure) {
        let entries: Vec<PendingEntry> = {
            let mut states = self.inner.states.lock();
            match states.get_mut(&worker) {
                Some(state) => state.pending.drain().map(|(_, e)| e).collect(),
                None => Vec::new(),
            }
        };
        for entry in entries {
            let _ = entry.tx.send(Err(failure.clone()));
        }
    }

    async fn mark_unhealthy(&self, worker: Worker, reason: &str) {
        tracing::warn!(worker = %worker, reason, "worker unhealthy");
        self.emit(
            worker,
            PoolEventKind::Unhealthy {
                reason: reason.to_string(),
            },
        );
        self.flush_pending(worker, &WorkerFailure::retryable(reason));
        // Kill without setting `stopping`: the exit handler restarts.
        let kill = {
            let mut states = self.inner.states.lock();
            states.get_mut(&worker).and_then(|s| {
                s.healthy = false;
                s.kill_tx.take()
            })
        };
        if let Some(tx) = kill {
            let _ = tx.send(());
        }
    }

    /// Dispatch one stdout line from `worker`.
    fn handle_line(&self, worker: Worker, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }
        let raw: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                // Unparseable output carries no id, so there is no awaiter
                // to fail; log and move on.
                tracing::warn!(worker = %worker, error = %e, "invalid response line from worker");
                return;
            }
        };

        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(RequestId::new);
        let latency_ms = id.as_ref().and_then(|id| {
            let states = self.inner.states.lock();
            states
                .get(&worker)?
                .pending
                .get(id)
                .map(|p| p.started_at.elapsed().as_millis() as u64)
        });

        match normalize_reply(raw, latency_ms) {
            WorkerReply::Event(event) => {
                self.emit(worker, PoolEventKind::Event(event));
            }
            WorkerReply::Response(resp) => {
                let Some(id) = resp.id.clone() else {
                    // No id on a response envelope: nothing to resolve.
                    tracing::debug!(worker = %worker, "dropping id-less response");
                    return;
                };
                let entry = {
                    let mut states = self.inner.states.lock();
                    match states.get_mut(&worker) {
                        Some(state) => {
                            let entry = state.pending.remove(&id);
                            if let Some(e) = &entry {
                                if e.cmd.starts_with("transcribe") {
                                    state.transcribe_active = false;
                                }
                            }
                            entry
                        }
                        None => None,
                    }
                };
                match entry {
                    Some(entry) => {
                        let result = if resp.ok {
                            Ok(resp)
                        } else {
                            Err(resp
                                .error
                                .clone()
                                .unwrap_or_else(|| WorkerFailure::user("worker error")))
                        };
                        let _ = entry.tx.send(result);
                    }
                    None => {
                        tracing::debug!(worker = %worker, id = %id, "response matched no pending request");
                    }
                }
            }
        }
    }

    /// Runs once per child exit; stale generations are ignored.
    async fn handle_exit(&self, worker: Worker, gen: u64) {
        let restart_from = {
            let mut states = self.inner.states.lock();
            let Some(state) = states.get_mut(&worker) else {
                return;
            };
            if state.spawn_gen != gen {
                return;
            }
            state.stdin = None;
            state.kill_tx = None;
            state.healthy = false;
            state.transcribe_active = false;
            if state.stopping {
                None
            } else {
                state.crash_count += 1;
                Some(state.crash_count)
            }
        };

        self.flush_pending(worker, &WorkerFailure::retryable(format!("{worker} process exited")));
        tracing::info!(worker = %worker, restart = restart_from.is_some(), "worker exited");

        if let Some(crash_count) = restart_from {
            self.schedule_restart(worker, gen, crash_count);
        }
    }

    /// Backoff restart loop; gives up only when the worker was stopped or
    /// respawned by someone else in the meantime.
    fn schedule_restart(&self, worker: Worker, gen: u64, crash_count: u32) {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut count = crash_count;
            loop {
                let delay = backoff_delay(count);
                tracing::info!(worker = %worker, delay_ms = delay.as_millis() as u64, "scheduling worker restart");
                tokio::time::sleep(delay).await;

                {
                    let states = pool.inner.states.lock();
                    match states.get(&worker) {
                        Some(s) if s.stopping || s.stdin.is_some() || s.spawn_gen != gen => return,
                        Some(_) => {}
                        None => return,
                    }
                }

                match pool.start(worker).await {
                    Ok(()) => return,
                    Err(e) => {
                        tracing::error!(worker = %worker, error = %e, "worker restart failed");
                        count += 1;
                        let mut states = pool.inner.states.lock();
                        if let Some(s) = states.get_mut(&worker) {
                            s.crash_count = count;
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl WorkerPool for ProcessPool {
    async fn start(&self, worker: Worker) -> Result<(), SupervisorError> {
        let spec = self
            .inner
            .config
            .spec(worker)
            .cloned()
            .ok_or(SupervisorError::NotConfigured(worker))?;

        {
            let states = self.inner.states.lock();
            if let Some(state) = states.get(&worker) {
                if state.stdin.is_some() {
                    return Ok(());
                }
            }
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| SupervisorError::SpawnFailed {
            worker,
            source: e,
        })?;

        let stdin = child.stdin.take().ok_or_else(|| SupervisorError::SpawnFailed {
            worker,
            source: std::io::Error::other("child stdin was not piped"),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| SupervisorError::SpawnFailed {
            worker,
            source: std::io::Error::other("child stdout was not piped"),
        })?;
        let stderr = child.stderr.take();

        let (kill_tx, kill_rx) = oneshot::channel();
        let gen = {
            let mut states = self.inner.states.lock();
            let state = states.entry(worker).or_default();
            state.spawn_gen += 1;
            state.stopping = false;
            // Spawn succeeded: the worker is healthy until proven otherwise.
            state.healthy = true;
            state.crash_count = 0;
            state.stdin = Some(Arc::new(tokio::sync::Mutex::new(stdin)));
            state.kill_tx = Some(kill_tx);
            state.spawn_gen
        };

        tracing::info!(worker = %worker, program = %spec.program, "worker started");
        self.emit(worker, PoolEventKind::Available);

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!(worker = %worker, "worker stderr: {line}");
                }
            });
        }

        let pool = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                pool.handle_line(worker, &line);
            }
        });

        let pool = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = child.wait() => {}
                _ = kill_rx => {}
            }
            // Either the child exited or a kill was requested; make sure it
            // is dead and reaped before the exit handler runs.
            let _ = child.start_kill();
            let _ = child.wait().await;
            pool.handle_exit(worker, gen).await;
        });

        Ok(())
    }

    async fn stop(&self, worker: Worker) {
        let kill = {
            let mut states = self.inner.states.lock();
            match states.get_mut(&worker) {
                Some(state) => {
                    state.stopping = true;
                    state.healthy = false;
                    state.kill_tx.take()
                }
                None => None,
            }
        };
        if let Some(tx) = kill {
            let _ = tx.send(());
        }
    }

    async fn restart(&self, worker: Worker, reason: &str) {
        tracing::info!(worker = %worker, reason, "restarting worker");
        self.flush_pending(worker, &WorkerFailure::retryable(reason));

        let kill = {
            let mut states = self.inner.states.lock();
            match states.get_mut(&worker) {
                Some(state) => {
                    // Block the exit handler's own restart; start() below
                    // clears the flag.
                    state.stopping = true;
                    state.healthy = false;
                    state.stdin = None;
                    state.kill_tx.take()
                }
                None => None,
            }
        };
        if let Some(tx) = kill {
            let _ = tx.send(());
        }

        if let Err(e) = self.start(worker).await {
            tracing::error!(worker = %worker, error = %e, "respawn after restart failed");
        }
    }

    fn is_running(&self, worker: Worker) -> bool {
        let states = self.inner.states.lock();
        states
            .get(&worker)
            .map(|s| s.stdin.is_some() && s.healthy)
            .unwrap_or(false)
    }

    async fn send_request(
        &self,
        envelope: RequestEnvelope,
    ) -> Result<ResponseEnvelope, WorkerFailure> {
        let worker = envelope.worker;
        let line = envelope
            .to_wire_line()
            .map_err(|e| WorkerFailure::user(e.to_string()))?;

        let (tx, rx) = oneshot::channel();
        let stdin = {
            let mut states = self.inner.states.lock();
            let state = match states.get_mut(&worker) {
                Some(s) if s.stdin.is_some() && s.healthy => s,
                _ => {
                    return Err(WorkerFailure::retryable(format!(
                        "{worker} worker is not running"
                    )))
                }
            };
            state.pending.insert(
                envelope.id.clone(),
                PendingEntry {
                    tx,
                    started_at: Instant::now(),
                    cmd: envelope.cmd.clone(),
                },
            );
            if worker == Worker::Media && envelope.cmd.starts_with("transcribe") {
                state.transcribe_active = true;
            }
            match &state.stdin {
                Some(stdin) => Arc::clone(stdin),
                // Unreachable given the guard above; treated as not running.
                None => {
                    state.pending.remove(&envelope.id);
                    return Err(WorkerFailure::retryable(format!(
                        "{worker} worker is not running"
                    )));
                }
            }
        };

        let write_result = {
            let mut guard = stdin.lock().await;
            async {
                guard.write_all(line.as_bytes()).await?;
                guard.write_all(b"\n").await?;
                guard.flush().await
            }
            .await
        };

        if let Err(e) = write_result {
            let mut states = self.inner.states.lock();
            if let Some(state) = states.get_mut(&worker) {
                state.pending.remove(&envelope.id);
            }
            return Err(WorkerFailure::retryable(format!(
                "write to {worker} worker failed: {e}"
            )));
        }

        match rx.await {
            Ok(result) => result,
            // Sender dropped without a verdict: the pending map was torn
            // down some way that didn't notify (should not happen).
            Err(_) => Err(WorkerFailure::retryable(format!("{worker} process exited"))),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
