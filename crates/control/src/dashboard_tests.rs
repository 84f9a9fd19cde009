// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ep_core::test_support::half_done_job;
use ep_core::StepRecord;

#[test]
fn eta_uses_mean_of_finished_steps() {
    // half_done_job: one step finished in 2000ms, one open.
    let job = half_done_job("job-1");
    assert_eq!(eta_ms(&job), Some(2_000));
}

#[test]
fn eta_absent_without_finished_steps() {
    let job = ep_core::Job::builder()
        .steps(vec![StepRecord::builder().build()])
        .build();
    assert_eq!(eta_ms(&job), None);
}

#[test]
fn eta_zero_when_everything_finished() {
    let mut job = half_done_job("job-1");
    job.steps.remove(1);
    assert_eq!(eta_ms(&job), Some(0));
}

#[test]
fn from_job_exposes_active_step() {
    let job = half_done_job("job-1");
    let row = DashboardJob::from_job(&job);

    assert_eq!(row.state, JobState::Running);
    let active = row.active_step.unwrap();
    assert_eq!(active.step_id, "second");
    assert_eq!(active.worker, Worker::Media);
    assert_eq!(active.state, StepState::Queued);
    assert_eq!(row.eta_ms, Some(2_000));
}

#[test]
fn terminal_job_has_no_active_step() {
    let mut job = half_done_job("job-1");
    job.state = JobState::Canceled;
    job.finished_at_ms = Some(5_000);

    let row = DashboardJob::from_job(&job);
    assert!(row.active_step.is_none());
    assert_eq!(row.finished_at_ms, Some(5_000));
}

#[test]
fn snapshot_row_serializes_compactly() {
    let mut job = half_done_job("job-1");
    job.steps.truncate(1);
    let row = DashboardJob::from_job(&job);
    let value = serde_json::to_value(&row).unwrap();
    assert_eq!(value["job_id"], "job-1");
    // terminal-only fields stay absent
    assert!(value.get("finished_at_ms").is_none());
}
