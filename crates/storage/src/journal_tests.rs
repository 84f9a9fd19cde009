// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use ep_core::JobState;

fn job(id: &str, state: JobState) -> Job {
    Job::builder().job_id(id).state(state).build()
}

#[test]
fn append_then_hydrate_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let mut journal = JobJournal::open(dir.path().join("jobs.jsonl")).unwrap();

    journal.append(&job("job-1", JobState::Queued), 10).unwrap();
    journal.append(&job("job-2", JobState::Running), 20).unwrap();

    let hydrated = journal.hydrate().unwrap();
    assert_eq!(hydrated.records, 2);
    assert_eq!(hydrated.jobs.len(), 2);
    assert_eq!(hydrated.jobs[&JobId::new("job-1")].state, JobState::Queued);
}

#[test]
fn last_snapshot_per_job_wins() {
    let dir = tempfile::tempdir().unwrap();
    let mut journal = JobJournal::open(dir.path().join("jobs.jsonl")).unwrap();

    journal.append(&job("job-1", JobState::Queued), 10).unwrap();
    journal.append(&job("job-1", JobState::Running), 20).unwrap();
    journal
        .append(&job("job-1", JobState::Succeeded), 30)
        .unwrap();

    let hydrated = journal.hydrate().unwrap();
    assert_eq!(hydrated.records, 3);
    assert_eq!(hydrated.jobs.len(), 1);
    assert_eq!(
        hydrated.jobs[&JobId::new("job-1")].state,
        JobState::Succeeded
    );
}

#[test]
fn missing_file_hydrates_empty() {
    let dir = tempfile::tempdir().unwrap();
    let journal = JobJournal::open(dir.path().join("jobs.jsonl")).unwrap();
    drop(journal);

    let hydrated = hydrate_path(&dir.path().join("never_written.jsonl")).unwrap();
    assert!(hydrated.jobs.is_empty());
    assert_eq!(hydrated.records, 0);
}

#[test]
fn journal_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.jsonl");

    {
        let mut journal = JobJournal::open(&path).unwrap();
        journal.append(&job("job-1", JobState::Failed), 10).unwrap();
    }

    let mut journal = JobJournal::open(&path).unwrap();
    journal.append(&job("job-2", JobState::Queued), 20).unwrap();

    let hydrated = journal.hydrate().unwrap();
    assert_eq!(hydrated.jobs.len(), 2);
}

#[test]
fn trailing_partial_line_stops_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.jsonl");

    {
        let mut journal = JobJournal::open(&path).unwrap();
        journal.append(&job("job-1", JobState::Queued), 10).unwrap();
    }
    // Simulate a crash mid-append.
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"ts\":20,\"job_id\":\"job-2\",\"sta").unwrap();
    }

    let hydrated = hydrate_path(&path).unwrap();
    assert_eq!(hydrated.records, 1);
    assert!(hydrated.jobs.contains_key(&JobId::new("job-1")));
}

#[test]
fn record_lines_carry_ts_state_and_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.jsonl");
    let mut journal = JobJournal::open(&path).unwrap();
    journal.append(&job("job-1", JobState::Running), 99).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
    assert_eq!(value["ts"], 99);
    assert_eq!(value["job_id"], "job-1");
    assert_eq!(value["state"], "running");
    assert_eq!(value["snapshot"]["job_id"], "job-1");
}
