// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker roles.
//!
//! The orchestrator supervises exactly three long-lived worker processes.
//! Every command is owned by exactly one role; routing a command to any
//! other role is a validation error (see `ep-proto`).

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The three worker roles the orchestrator supervises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Worker {
    /// Domain-application worker (Resolve bindings).
    Resolve,
    /// Media/compute worker (transcription, GPU probing).
    Media,
    /// Platform worker (auth and uploads).
    Platform,
}

impl Worker {
    /// All roles, in a fixed order.
    pub const ALL: [Worker; 3] = [Worker::Resolve, Worker::Media, Worker::Platform];

    pub fn as_str(&self) -> &'static str {
        match self {
            Worker::Resolve => "resolve",
            Worker::Media => "media",
            Worker::Platform => "platform",
        }
    }

    /// Default per-worker concurrency (`resolve` is serial by nature).
    pub fn default_concurrency(&self) -> u32 {
        match self {
            Worker::Resolve => 1,
            Worker::Media => 2,
            Worker::Platform => 2,
        }
    }
}

crate::simple_display! {
    Worker {
        Resolve => "resolve",
        Media => "media",
        Platform => "platform",
    }
}

/// Error for unrecognized worker names.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown worker: {0}")]
pub struct UnknownWorker(pub String);

impl FromStr for Worker {
    type Err = UnknownWorker;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resolve" => Ok(Worker::Resolve),
            "media" => Ok(Worker::Media),
            "platform" => Ok(Worker::Platform),
            other => Err(UnknownWorker(other.to_string())),
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
