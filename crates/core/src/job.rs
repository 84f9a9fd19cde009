// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job identifier and state machine.

use crate::failure::WorkerFailure;
use crate::step::{RetryPolicy, StepId, StepRecord, StepState};
use serde::{Deserialize, Serialize};

crate::define_id! {
    /// Unique identifier for a job instance.
    ///
    /// Each submitted plan gets a unique ID used to track its state,
    /// query its status, and reference it in logs and events.
    #[derive(Default)]
    pub struct JobId;
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Canceled
        )
    }
}

crate::simple_display! {
    JobState {
        Queued => "queued",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        Canceled => "canceled",
    }
}

/// A job instance: a materialized plan with its step DAG.
///
/// Jobs are exclusively owned by the engine's scheduler task. They are
/// created at submit, mutated only there, and never deleted (history).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    /// Recipe id this job was compiled from.
    pub preset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub state: JobState,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    pub steps: Vec<StepRecord>,
    /// Materialized recipe outputs, appended at success.
    #[serde(default)]
    pub outputs: Vec<serde_json::Value>,
    /// Outputs template carried from the plan, interpolated at success.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub outputs_template: serde_json::Value,
    /// Per-job error log; the first entry is the surfaced one.
    #[serde(default)]
    pub errors: Vec<WorkerFailure>,
    /// Merged user input the plan was built from (kept for retry).
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    /// Per-step request timeout; 0 disables the timeout.
    #[serde(default)]
    pub timeout_ms: u64,
}

impl Job {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn step(&self, step_id: &StepId) -> Option<&StepRecord> {
        self.steps.iter().find(|s| &s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &StepId) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|s| &s.step_id == step_id)
    }

    /// True when `step_id` names a step that has succeeded.
    pub fn step_succeeded(&self, step_id: &StepId) -> bool {
        self.step(step_id)
            .map(|s| s.state == StepState::Succeeded)
            .unwrap_or(false)
    }

    /// Durations of all finished steps, for ETA estimation.
    pub fn finished_step_timings_ms(&self) -> Vec<u64> {
        self.steps.iter().filter_map(|s| s.timing_ms()).collect()
    }

    /// Count of steps not yet in a terminal state.
    pub fn open_step_count(&self) -> usize {
        self.steps.iter().filter(|s| !s.state.is_terminal()).count()
    }

    /// The step currently closest to execution, if any.
    ///
    /// Prefers a `running` step, then `dispatching`, then `queued`.
    pub fn active_step(&self) -> Option<&StepRecord> {
        for wanted in [StepState::Running, StepState::Dispatching, StepState::Queued] {
            if let Some(s) = self.steps.iter().find(|s| s.state == wanted) {
                return Some(s);
            }
        }
        None
    }

    /// Total duration, when the job has finished.
    pub fn timing_ms(&self) -> Option<u64> {
        match (self.started_at_ms, self.finished_at_ms) {
            (Some(s), Some(f)) if f >= s => Some(f - s),
            _ => None,
        }
    }
}

crate::builder! {
    pub struct JobBuilder => Job {
        into {
            job_id: JobId = "job-1",
            preset_id: String = "transcribe_folder",
        }
        set {
            state: JobState = JobState::Queued,
            created_at_ms: u64 = 1_000_000,
            steps: Vec<StepRecord> = Vec::new(),
            outputs: Vec<serde_json::Value> = Vec::new(),
            outputs_template: serde_json::Value = serde_json::Value::Null,
            errors: Vec<WorkerFailure> = Vec::new(),
            input: serde_json::Value = serde_json::Value::Null,
            retry_policy: RetryPolicy = RetryPolicy::default(),
            timeout_ms: u64 = 0,
        }
        option {
            idempotency_key: String = None,
            started_at_ms: u64 = None,
            finished_at_ms: u64 = None,
        }
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
