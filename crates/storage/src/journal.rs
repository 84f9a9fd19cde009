// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only job journal.
//!
//! Each entry is a single line of JSON:
//! `{"ts":…,"job_id":"…","state":"…","snapshot":{…}}\n`
//!
//! Snapshots are self-contained, so hydration is a pure replay where the
//! last snapshot per job wins. A trailing partial line (crash mid-append)
//! is tolerated: replay warns and stops at the corruption point.

use crate::StorageError;
use ep_core::{Job, JobId, JobState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// One journal line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalRecord {
    pub ts: u64,
    pub job_id: JobId,
    pub state: JobState,
    pub snapshot: Job,
}

/// Jobs recovered from a replay.
#[derive(Debug, Default)]
pub struct HydratedJobs {
    /// Last snapshot per job id.
    pub jobs: HashMap<JobId, Job>,
    /// Total records read (before deduplication).
    pub records: usize,
}

/// Append-only journal of job snapshots.
pub struct JobJournal {
    file: File,
    path: PathBuf,
}

impl JobJournal {
    /// Open or create the journal at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file, path })
    }

    /// Append one snapshot and make it durable.
    pub fn append(&mut self, job: &Job, ts: u64) -> Result<(), StorageError> {
        let record = JournalRecordRef {
            ts,
            job_id: &job.job_id,
            state: job.state,
            snapshot: job,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Replay the journal; the last snapshot per job id wins.
    pub fn hydrate(&self) -> Result<HydratedJobs, StorageError> {
        hydrate_path(&self.path)
    }
}

/// Serialization helper for writing entries without cloning the job.
#[derive(Serialize)]
struct JournalRecordRef<'a> {
    ts: u64,
    job_id: &'a JobId,
    state: JobState,
    snapshot: &'a Job,
}

/// Replay a journal file without holding a writer open.
pub fn hydrate_path(path: &Path) -> Result<HydratedJobs, StorageError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HydratedJobs::default()),
        Err(e) => return Err(e.into()),
    };

    let mut hydrated = HydratedJobs::default();
    let reader = BufReader::new(file);
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => break,
            Err(e) => return Err(e.into()),
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let record: JournalRecord = match serde_json::from_str(trimmed) {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "corrupt journal entry, stopping replay at corruption point",
                );
                break;
            }
        };

        hydrated.records += 1;
        hydrated.jobs.insert(record.job_id, record.snapshot);
    }

    Ok(hydrated)
}

#[cfg(test)]
#[path = "journal_tests.rs"]
mod tests;
