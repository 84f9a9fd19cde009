// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine handle and the scheduler actor's mailbox.

use crate::scheduler::SchedulerState;
use crate::EngineError;
use ep_core::{Clock, EngineEvent, IdGen, Job, JobId, StepId, Worker, WorkerFailure};
use ep_recipes::Plan;
use ep_storage::JobJournal;
use ep_supervisor::{PoolEvent, PoolEventKind, WorkerPool};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Broadcast capacity for engine events; lagging subscribers drop.
const EVENT_CAPACITY: usize = 256;

/// Mailbox depth for the scheduler actor.
const MAILBOX_CAPACITY: usize = 256;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Append-only journal of job snapshots.
    pub journal_path: PathBuf,
    /// Step cache document.
    pub cache_path: PathBuf,
    /// Initial per-worker concurrency (from preferences).
    pub concurrency: HashMap<Worker, u32>,
    /// Delay before the forced worker kill after cancelling a running step.
    pub cancel_kill_delay: Duration,
}

impl EngineConfig {
    pub fn new(journal_path: impl Into<PathBuf>, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            journal_path: journal_path.into(),
            cache_path: cache_path.into(),
            concurrency: Worker::ALL
                .iter()
                .map(|w| (*w, w.default_concurrency()))
                .collect(),
            cancel_kill_delay: Duration::from_secs(1),
        }
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelAck {
    pub ok: bool,
    pub message: String,
}

/// Messages into the scheduler actor.
pub(crate) enum EngineMsg {
    Submit {
        plan: Plan,
        reply: oneshot::Sender<Job>,
    },
    Cancel {
        job_id: JobId,
        reply: oneshot::Sender<CancelAck>,
    },
    /// A step task finished; `attempt` guards against stale results.
    StepResult {
        job_id: JobId,
        step_id: StepId,
        attempt: u32,
        result: Result<serde_json::Value, WorkerFailure>,
    },
    /// The cancel-kill timer fired for a running step.
    CancelKill { job_id: JobId, step_id: StepId },
    SetConcurrency {
        concurrency: HashMap<Worker, u32>,
    },
    Jobs {
        reply: oneshot::Sender<Vec<Job>>,
    },
    GetJob {
        job_id: JobId,
        reply: oneshot::Sender<Option<Job>>,
    },
    InvalidateCache {
        fingerprint: Option<String>,
        reply: oneshot::Sender<Result<(), String>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the engine actor.
#[derive(Clone)]
pub struct Engine {
    tx: mpsc::Sender<EngineMsg>,
    events: broadcast::Sender<EngineEvent>,
}

impl Engine {
    /// Hydrate the journal, apply the resume policy, and start the
    /// scheduler task. Non-terminal jobs are re-enqueued immediately.
    pub fn start<P, C, G>(
        config: EngineConfig,
        pool: Arc<P>,
        clock: C,
        id_gen: G,
    ) -> Result<Self, EngineError>
    where
        P: WorkerPool,
        C: Clock,
        G: IdGen + 'static,
    {
        let journal = JobJournal::open(&config.journal_path)?;
        let hydrated = journal.hydrate()?;
        let cache = ep_cache::CacheStore::open(&config.cache_path)?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);

        let mut state = SchedulerState::new(
            config,
            pool,
            clock,
            id_gen,
            journal,
            cache,
            events.clone(),
            tx.clone(),
        );
        let resumable = state.hydrate(hydrated);

        let engine = Self {
            tx,
            events: events.clone(),
        };

        engine.spawn_pool_forwarder(&state);
        tokio::spawn(state.run(rx, resumable));

        Ok(engine)
    }

    /// Forward pool notifications onto the engine event stream.
    ///
    /// Worker lifecycle becomes `worker_status`; id-less worker events with
    /// a `{job}:{step}:{attempt}` trace become `step_progress` updates.
    fn spawn_pool_forwarder<P, C, G>(&self, state: &SchedulerState<P, C, G>)
    where
        P: WorkerPool,
        C: Clock,
        G: IdGen + 'static,
    {
        let mut pool_events = state.pool().subscribe();
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                let event = match pool_events.recv().await {
                    Ok(e) => e,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(dropped = n, "pool event subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                if let Some(mapped) = map_pool_event(event) {
                    let _ = events.send(mapped);
                }
            }
        });
    }

    pub async fn submit(&self, plan: Plan) -> Result<Job, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::Submit { plan, reply })
            .await
            .map_err(|_| EngineError::SchedulerGone)?;
        rx.await.map_err(|_| EngineError::SchedulerGone)
    }

    pub async fn cancel(&self, job_id: &JobId) -> CancelAck {
        let (reply, rx) = oneshot::channel();
        let sent = self
            .tx
            .send(EngineMsg::Cancel {
                job_id: job_id.clone(),
                reply,
            })
            .await;
        if sent.is_err() {
            return CancelAck {
                ok: false,
                message: "engine is shut down".to_string(),
            };
        }
        rx.await.unwrap_or(CancelAck {
            ok: false,
            message: "engine is shut down".to_string(),
        })
    }

    /// All jobs, in creation order.
    pub async fn jobs(&self) -> Vec<Job> {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(EngineMsg::Jobs { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn job(&self, job_id: &JobId) -> Option<Job> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(EngineMsg::GetJob {
                job_id: job_id.clone(),
                reply,
            })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Re-apply per-worker concurrency (from a preferences update).
    pub async fn set_concurrency(&self, concurrency: HashMap<Worker, u32>) {
        let _ = self
            .tx
            .send(EngineMsg::SetConcurrency { concurrency })
            .await;
    }

    /// Drop one cache entry, or all of them.
    pub async fn invalidate_cache(&self, fingerprint: Option<String>) -> Result<(), EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(EngineMsg::InvalidateCache { fingerprint, reply })
            .await
            .map_err(|_| EngineError::SchedulerGone)?;
        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "cache invalidation failed");
                Ok(())
            }
            Err(_) => Err(EngineError::SchedulerGone),
        }
    }

    /// Subscribe to engine events. Lagging subscribers drop events but
    /// never block the scheduler.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Stop the scheduler after the current message.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(EngineMsg::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Translate a pool notification into an engine event.
fn map_pool_event(event: PoolEvent) -> Option<EngineEvent> {
    match event.kind {
        PoolEventKind::Available => Some(EngineEvent::WorkerStatus {
            worker: event.worker,
            code: ep_core::event::WORKER_AVAILABLE.to_string(),
            message: None,
        }),
        PoolEventKind::Unhealthy { reason } => Some(EngineEvent::WorkerStatus {
            worker: event.worker,
            code: ep_core::event::WORKER_UNHEALTHY.to_string(),
            message: Some(reason),
        }),
        PoolEventKind::Event(worker_event) => {
            // Only events carrying a step trace can be attributed.
            let trace = worker_event.trace_id.as_ref()?.to_string();
            let mut parts = trace.splitn(3, ':');
            let job_id = parts.next()?;
            let step_id = parts.next()?;
            let _attempt = parts.next()?;
            Some(EngineEvent::StepProgress {
                job_id: JobId::new(job_id),
                step_id: StepId::new(step_id),
                worker: event.worker,
                state: ep_core::StepState::Running,
                code: worker_event.code.clone(),
                output: worker_event.data.clone(),
                error: None,
                timing_ms: None,
            })
        }
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
