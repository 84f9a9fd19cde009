// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ep-supervisor: lifecycle of the three worker processes.
//!
//! Each worker is a long-lived child process speaking newline-delimited
//! JSON over stdin/stdout. The supervisor owns spawning, a per-worker
//! pending map of in-flight requests, health pings, and crash-restart
//! with backoff. The [`WorkerPool`] trait is the seam the engine runs
//! against; [`ProcessPool`] is the production implementation and
//! `FakePool` (behind `test-support`) the scripted test double.

mod config;
mod pool;
mod process;

pub use config::{SpawnSpec, SupervisorConfig, RESTART_BACKOFF_MS};
pub use pool::{PoolEvent, PoolEventKind, WorkerPool};
pub use process::ProcessPool;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakePool, ScriptedReply};

use thiserror::Error;

/// Errors from worker lifecycle operations.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("no spawn spec configured for worker: {0}")]
    NotConfigured(ep_core::Worker),
    #[error("failed to spawn {worker}: {source}")]
    SpawnFailed {
        worker: ep_core::Worker,
        #[source]
        source: std::io::Error,
    },
}
