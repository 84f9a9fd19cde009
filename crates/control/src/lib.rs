// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ep-control: the surface the front end talks to.
//!
//! Recipe launch and retry, job queries and cancel, dashboard snapshots
//! with ETA, persisted preferences, and a ring buffer of recent engine
//! events. Transport is the caller's concern; everything here is plain
//! async methods plus the engine's event stream.

mod dashboard;
mod plane;
mod ring;

pub use dashboard::{ActiveStep, DashboardJob};
pub use plane::{ControlPlane, LaunchReceipt, PrefsPatch};
pub use ring::EventRing;

use thiserror::Error;

/// Errors surfaced to the front end.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Recipe(#[from] ep_recipes::RecipeError),
    #[error(transparent)]
    Engine(#[from] ep_engine::EngineError),
    #[error("storage error: {0}")]
    Storage(#[from] ep_storage::StorageError),
    #[error("job not found: {0}")]
    JobNotFound(String),
    #[error("job input is not a mapping: {0}")]
    BadJobInput(String),
}
