// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ep-storage: durable job journal and preferences.
//!
//! The journal is an append-only JSONL file of self-contained job
//! snapshots; hydration replays it with last-snapshot-per-job-wins.
//! Preferences persist as a single JSON document written atomically.

mod journal;
mod prefs;

pub use journal::{HydratedJobs, JobJournal, JournalRecord};
pub use prefs::{Preferences, PrefsStore};

use thiserror::Error;

/// Errors from journal and preferences persistence.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
