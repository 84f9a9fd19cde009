// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted pool for engine and control-plane tests.

use crate::pool::{PoolEvent, PoolEventKind, WorkerPool};
use crate::SupervisorError;
use async_trait::async_trait;
use ep_core::{Worker, WorkerFailure};
use ep_proto::{RequestEnvelope, ResponseEnvelope};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One scripted answer for a command.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Respond `ok: true` with this data.
    Ok(Value),
    /// Respond with this failure.
    Err(WorkerFailure),
    /// Never respond (exercises caller timeouts).
    Hang,
}

struct FakeInner {
    /// Scripted replies per command, consumed front to back.
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    /// Every envelope sent, in order.
    calls: Mutex<Vec<RequestEnvelope>>,
    running: Mutex<HashSet<Worker>>,
    restarts: Mutex<Vec<(Worker, String)>>,
    events: broadcast::Sender<PoolEvent>,
    /// Keeps `Hang` futures pending forever.
    hung: Mutex<Vec<tokio::sync::oneshot::Sender<()>>>,
}

/// In-memory [`WorkerPool`] with scripted replies and a call log.
#[derive(Clone)]
pub struct FakePool {
    inner: Arc<FakeInner>,
}

impl Default for FakePool {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePool {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        let pool = Self {
            inner: Arc::new(FakeInner {
                replies: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
                running: Mutex::new(HashSet::new()),
                restarts: Mutex::new(Vec::new()),
                events,
                hung: Mutex::new(Vec::new()),
            }),
        };
        // Workers are up by default; tests stop them explicitly.
        for worker in Worker::ALL {
            pool.inner.running.lock().insert(worker);
        }
        pool
    }

    /// Queue a scripted reply for `cmd` (consumed in FIFO order).
    pub fn script(&self, cmd: &str, reply: ScriptedReply) {
        self.inner
            .replies
            .lock()
            .entry(cmd.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Convenience: queue an `ok` reply with `data`.
    pub fn script_ok(&self, cmd: &str, data: Value) {
        self.script(cmd, ScriptedReply::Ok(data));
    }

    /// All envelopes sent so far.
    pub fn calls(&self) -> Vec<RequestEnvelope> {
        self.inner.calls.lock().clone()
    }

    /// Envelopes sent for one command.
    pub fn calls_for(&self, cmd: &str) -> Vec<RequestEnvelope> {
        self.inner
            .calls
            .lock()
            .iter()
            .filter(|e| e.cmd == cmd)
            .cloned()
            .collect()
    }

    /// Restarts requested so far, with reasons.
    pub fn restarts(&self) -> Vec<(Worker, String)> {
        self.inner.restarts.lock().clone()
    }

    /// Emit a pool event to subscribers (e.g. a fake worker progress event).
    pub fn emit(&self, worker: Worker, kind: PoolEventKind) {
        let _ = self.inner.events.send(PoolEvent { worker, kind });
    }
}

#[async_trait]
impl WorkerPool for FakePool {
    async fn start(&self, worker: Worker) -> Result<(), SupervisorError> {
        self.inner.running.lock().insert(worker);
        self.emit(worker, PoolEventKind::Available);
        Ok(())
    }

    async fn stop(&self, worker: Worker) {
        self.inner.running.lock().remove(&worker);
    }

    async fn restart(&self, worker: Worker, reason: &str) {
        self.inner
            .restarts
            .lock()
            .push((worker, reason.to_string()));
        // A restart flushes the pending map: hung requests resolve now.
        self.inner.hung.lock().clear();
        self.inner.running.lock().insert(worker);
        self.emit(worker, PoolEventKind::Available);
    }

    fn is_running(&self, worker: Worker) -> bool {
        self.inner.running.lock().contains(&worker)
    }

    async fn send_request(
        &self,
        envelope: RequestEnvelope,
    ) -> Result<ResponseEnvelope, WorkerFailure> {
        if !self.is_running(envelope.worker) {
            return Err(WorkerFailure::retryable(format!(
                "{} worker is not running",
                envelope.worker
            )));
        }

        let scripted = {
            let mut replies = self.inner.replies.lock();
            replies.get_mut(&envelope.cmd).and_then(VecDeque::pop_front)
        };
        let id = envelope.id.clone();
        self.inner.calls.lock().push(envelope);

        match scripted {
            // Unscripted commands succeed with an empty payload.
            None => Ok(ResponseEnvelope {
                id: Some(id),
                ok: true,
                data: Some(Value::Object(serde_json::Map::new())),
                error: None,
                metrics: None,
            }),
            Some(ScriptedReply::Ok(data)) => Ok(ResponseEnvelope {
                id: Some(id),
                ok: true,
                data: Some(data),
                error: None,
                metrics: None,
            }),
            Some(ScriptedReply::Err(failure)) => Err(failure),
            Some(ScriptedReply::Hang) => {
                let (tx, rx) = tokio::sync::oneshot::channel();
                self.inner.hung.lock().push(tx);
                // Held sender keeps this pending until a restart flushes it
                // (or the pool drops).
                let _ = rx.await;
                Err(WorkerFailure::retryable("worker process exited"))
            }
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.inner.events.subscribe()
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
