// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The worker-pool seam the engine runs against.

use crate::SupervisorError;
use async_trait::async_trait;
use ep_core::{Worker, WorkerFailure};
use ep_proto::{RequestEnvelope, ResponseEnvelope, WorkerEvent};
use tokio::sync::broadcast;

/// Out-of-band notifications from the pool.
#[derive(Debug, Clone)]
pub struct PoolEvent {
    pub worker: Worker,
    pub kind: PoolEventKind,
}

#[derive(Debug, Clone)]
pub enum PoolEventKind {
    /// Worker process spawned and is accepting requests.
    Available,
    /// Health check failed; a restart is on its way.
    Unhealthy { reason: String },
    /// Id-less event emitted by the worker itself (status/progress/message).
    Event(WorkerEvent),
}

/// Lifecycle and request dispatch for the named workers.
///
/// `send_request` fails fast with a retryable failure when the worker is
/// not running; otherwise it resolves when the matching response arrives
/// or the pending map is flushed (worker exit, restart, shutdown).
/// Callers own timeouts.
#[async_trait]
pub trait WorkerPool: Send + Sync + 'static {
    async fn start(&self, worker: Worker) -> Result<(), SupervisorError>;

    /// Intentional teardown; pending requests flush as retryable failures
    /// and no restart is scheduled.
    async fn stop(&self, worker: Worker);

    /// Kill and respawn, flushing the pending map with `reason`.
    async fn restart(&self, worker: Worker, reason: &str);

    fn is_running(&self, worker: Worker) -> bool;

    async fn send_request(
        &self,
        envelope: RequestEnvelope,
    ) -> Result<ResponseEnvelope, WorkerFailure>;

    /// Subscribe to pool events. Lagging subscribers drop events.
    fn subscribe(&self) -> broadcast::Receiver<PoolEvent>;
}
