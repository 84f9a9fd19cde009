// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ep-engine: the job engine.
//!
//! A single scheduler task owns the job index; every job and step
//! transition happens there. Step execution runs in spawned tasks that
//! only ever message a result back, so no job state is mutated off the
//! scheduler. Every mutation is journaled and fanned out as an event.

mod engine;
mod scheduler;

pub use engine::{CancelAck, Engine, EngineConfig};

use thiserror::Error;

/// Errors surfaced by the engine API.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] ep_storage::StorageError),
    #[error("cache error: {0}")]
    Cache(#[from] ep_cache::CacheError),
    #[error("engine is shut down")]
    SchedulerGone,
}
