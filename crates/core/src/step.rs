// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Step state machine and per-step execution config.

use crate::failure::WorkerFailure;
use crate::worker::Worker;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

crate::define_id! {
    /// Identifier of a step within its job (unique per recipe).
    pub struct StepId;
}

/// Status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    /// Waiting for dependencies or a concurrency slot
    Queued,
    /// Enqueued on its worker's FIFO, not yet running
    Dispatching,
    /// Request in flight on the worker
    Running,
    /// Terminal: output accepted
    Succeeded,
    /// Terminal: attempts exhausted or fatal error
    Failed,
    /// Terminal: cancellation won the race
    Canceled,
}

impl StepState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Succeeded | StepState::Failed | StepState::Canceled
        )
    }
}

crate::simple_display! {
    StepState {
        Queued => "queued",
        Dispatching => "dispatching",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Canceled => "canceled",
    }
}

/// Retry budget for a step or a whole plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of runs allowed (1 = no retries).
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

/// Whether and how long a step's result may be served from the step cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CachePolicy {
    #[serde(default)]
    pub enabled: bool,
    /// Entry expiry; `None` means no expiry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

/// Declarative post-condition a step's output must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractKind {
    /// Output must be present and non-null.
    #[default]
    NonNull,
    /// Output must list produced transcription files that exist on disk.
    TranscribeOutput,
}

crate::simple_display! {
    ContractKind {
        NonNull => "non_null",
        TranscribeOutput => "transcribe_output",
    }
}

/// Tool version strings mixed into a step's cache fingerprint.
///
/// Sorted map so the canonical serialization is stable.
pub type ToolVersions = BTreeMap<String, String>;

/// Cancellation marker on a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cancellation {
    #[serde(default)]
    pub requested: bool,
}

/// Runtime record of one step of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: StepId,
    pub cmd: String,
    pub worker: Worker,
    /// Fully interpolated payload sent to the worker.
    pub payload: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<StepId>,
    pub state: StepState,
    /// Incremented each time the step actually runs; 0 for cache hits.
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerFailure>,
    #[serde(default)]
    pub cancellation: Cancellation,
    #[serde(default)]
    pub cache_policy: CachePolicy,
    #[serde(default)]
    pub output_contract: ContractKind,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_versions: ToolVersions,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
}

impl StepRecord {
    /// True when `succeeded` holds for every dependency of this step.
    pub fn deps_satisfied(&self, succeeded: impl Fn(&StepId) -> bool) -> bool {
        self.depends_on.iter().all(succeeded)
    }

    /// Duration of the last run, when both timestamps are present.
    pub fn timing_ms(&self) -> Option<u64> {
        match (self.started_at_ms, self.finished_at_ms) {
            (Some(s), Some(f)) if f >= s => Some(f - s),
            _ => None,
        }
    }
}

crate::builder! {
    pub struct StepRecordBuilder => StepRecord {
        into {
            step_id: StepId = "step-1",
            cmd: String = "transcribe_folder",
        }
        set {
            worker: Worker = Worker::Media,
            payload: serde_json::Value = serde_json::Value::Null,
            depends_on: Vec<StepId> = Vec::new(),
            state: StepState = StepState::Queued,
            attempt: u32 = 0,
            cancellation: Cancellation = Cancellation::default(),
            cache_policy: CachePolicy = CachePolicy::default(),
            output_contract: ContractKind = ContractKind::default(),
            tool_versions: ToolVersions = ToolVersions::new(),
            retry_policy: RetryPolicy = RetryPolicy::default(),
        }
        option {
            started_at_ms: u64 = None,
            finished_at_ms: u64 = None,
            output: serde_json::Value = None,
            error: WorkerFailure = None,
        }
    }
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
