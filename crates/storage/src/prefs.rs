// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted preferences: per-recipe defaults and worker concurrency.

use crate::StorageError;
use ep_core::Worker;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;

/// User preferences, persisted atomically after each mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preferences {
    /// Saved launch defaults, merged under user input per recipe.
    #[serde(default)]
    pub recipe_defaults: HashMap<String, Map<String, Value>>,
    /// Per-worker concurrency limits (positive).
    #[serde(default = "default_concurrency")]
    pub worker_concurrency: HashMap<Worker, u32>,
}

fn default_concurrency() -> HashMap<Worker, u32> {
    Worker::ALL
        .iter()
        .map(|w| (*w, w.default_concurrency()))
        .collect()
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            recipe_defaults: HashMap::new(),
            worker_concurrency: default_concurrency(),
        }
    }
}

impl Preferences {
    /// Effective concurrency for a worker, never below 1.
    pub fn concurrency_for(&self, worker: Worker) -> u32 {
        self.worker_concurrency
            .get(&worker)
            .copied()
            .unwrap_or_else(|| worker.default_concurrency())
            .max(1)
    }
}

/// Loads and atomically saves the preferences document.
pub struct PrefsStore {
    path: PathBuf,
}

impl PrefsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load preferences; a missing or corrupt file yields the defaults.
    pub fn load(&self) -> Preferences {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(prefs) => prefs,
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "corrupt preferences file, using defaults",
                    );
                    Preferences::default()
                }
            },
            Err(_) => Preferences::default(),
        }
    }

    /// Write the document atomically: temp file, fsync, rename.
    pub fn save(&self, prefs: &Preferences) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        let text = serde_json::to_string_pretty(prefs)?;
        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "prefs_tests.rs"]
mod tests;
