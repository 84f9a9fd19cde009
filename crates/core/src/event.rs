// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine events fanned out to subscribers.
//!
//! Serializes with `{"type": "job_state" | "step_progress" | "worker_status",
//! ...fields}`. Subscribers receive owned copies; delivery order to a single
//! subscriber is the order the engine produced them.

use crate::failure::WorkerFailure;
use crate::job::{JobId, JobState};
use crate::step::{StepId, StepState};
use crate::worker::Worker;
use serde::{Deserialize, Serialize};

/// One engine event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A job entered a new state.
    JobState {
        job_id: JobId,
        state: JobState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timing_ms: Option<u64>,
    },

    /// A step entered a new state.
    StepProgress {
        job_id: JobId,
        step_id: StepId,
        worker: Worker,
        state: StepState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<WorkerFailure>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timing_ms: Option<u64>,
    },

    /// A worker process became available or unhealthy.
    WorkerStatus {
        worker: Worker,
        code: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Status code emitted when a worker process has spawned and is healthy.
pub const WORKER_AVAILABLE: &str = "WORKER_AVAILABLE";

/// Status code emitted when a health check fails and a restart is scheduled.
pub const WORKER_UNHEALTHY: &str = "WORKER_UNHEALTHY";

impl EngineEvent {
    /// The job this event concerns, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            EngineEvent::JobState { job_id, .. } | EngineEvent::StepProgress { job_id, .. } => {
                Some(job_id)
            }
            EngineEvent::WorkerStatus { .. } => None,
        }
    }

    /// One-line `key=val` summary for logs.
    pub fn log_summary(&self) -> String {
        match self {
            EngineEvent::JobState {
                job_id,
                state,
                timing_ms,
            } => match timing_ms {
                Some(ms) => format!("job_state id={job_id} state={state} timing_ms={ms}"),
                None => format!("job_state id={job_id} state={state}"),
            },
            EngineEvent::StepProgress {
                job_id,
                step_id,
                worker,
                state,
                ..
            } => {
                format!("step_progress id={job_id} step={step_id} worker={worker} state={state}")
            }
            EngineEvent::WorkerStatus { worker, code, .. } => {
                format!("worker_status worker={worker} code={code}")
            }
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
