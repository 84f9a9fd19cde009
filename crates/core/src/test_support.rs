// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for other crates' tests.

use crate::job::{Job, JobState};
use crate::step::{StepRecord, StepState};
use crate::worker::Worker;
use serde_json::json;

/// A queued media step with a realistic payload.
pub fn media_step(step_id: &str) -> StepRecord {
    StepRecord::builder()
        .step_id(step_id)
        .cmd("transcribe_folder")
        .worker(Worker::Media)
        .payload(json!({"folder_path": "/tmp/audio", "use_gpu": false}))
        .build()
}

/// A running job with one finished and one open step, for dashboard tests.
pub fn half_done_job(job_id: &str) -> Job {
    let done = StepRecord::builder()
        .step_id("first")
        .state(StepState::Succeeded)
        .attempt(1)
        .started_at_ms(1_000u64)
        .finished_at_ms(3_000u64)
        .output(json!({"ok": true}))
        .build();
    let mut open = media_step("second");
    open.depends_on = vec![done.step_id.clone()];
    Job::builder()
        .job_id(job_id)
        .state(JobState::Running)
        .started_at_ms(1_000u64)
        .steps(vec![done, open])
        .build()
}
