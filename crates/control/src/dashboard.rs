// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dashboard snapshot shapes and the ETA estimate.

use ep_core::{Job, JobId, JobState, StepState, Worker};
use serde::{Deserialize, Serialize};

/// The step a job is currently working on (or about to).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveStep {
    pub step_id: String,
    pub worker: Worker,
    pub cmd: String,
    pub state: StepState,
    pub attempt: u32,
}

/// One dashboard row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardJob {
    pub job_id: JobId,
    pub preset_id: String,
    pub state: JobState,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_step: Option<ActiveStep>,
    /// Mean finished-step duration times the open step count; absent
    /// until at least one step has finished.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_ms: Option<u64>,
}

impl DashboardJob {
    pub fn from_job(job: &Job) -> Self {
        let active_step = if job.is_terminal() {
            None
        } else {
            job.active_step().map(|s| ActiveStep {
                step_id: s.step_id.as_str().to_string(),
                worker: s.worker,
                cmd: s.cmd.clone(),
                state: s.state,
                attempt: s.attempt,
            })
        };
        Self {
            job_id: job.job_id.clone(),
            preset_id: job.preset_id.clone(),
            state: job.state,
            created_at_ms: job.created_at_ms,
            started_at_ms: job.started_at_ms,
            finished_at_ms: job.finished_at_ms,
            active_step,
            eta_ms: eta_ms(job),
        }
    }
}

/// Remaining-time estimate from finished-step durations.
pub(crate) fn eta_ms(job: &Job) -> Option<u64> {
    let timings = job.finished_step_timings_ms();
    if timings.is_empty() {
        return None;
    }
    let mean = timings.iter().sum::<u64>() / timings.len() as u64;
    Some(mean * job.open_step_count() as u64)
}

#[cfg(test)]
#[path = "dashboard_tests.rs"]
mod tests;
