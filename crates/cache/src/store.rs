// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Keyed persistent store for step results.
//!
//! Persists as a single JSON document `{"entries": {fingerprint → entry}}`,
//! written atomically (temp file + rename) after each mutation.

use crate::CacheError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One cached step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub created_at: u64,
    pub output: Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    #[serde(default)]
    entries: HashMap<String, CacheEntry>,
}

/// The step cache store.
pub struct CacheStore {
    path: PathBuf,
    doc: StoreDocument,
}

impl CacheStore {
    /// Open the store at `path`, loading the existing document if present.
    ///
    /// A corrupt document is discarded with a warning rather than failing
    /// startup; the cache then rebuilds organically.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let doc = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "corrupt cache store, starting empty");
                    StoreDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreDocument::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, doc })
    }

    /// Look up an entry, honoring an optional TTL.
    ///
    /// Expired entries are treated as absent (left on disk until the next
    /// write or explicit invalidation).
    pub fn get(&self, fingerprint: &str, ttl_ms: Option<u64>, now_ms: u64) -> Option<&CacheEntry> {
        let entry = self.doc.entries.get(fingerprint)?;
        if let Some(ttl) = ttl_ms {
            if now_ms.saturating_sub(entry.created_at) > ttl {
                return None;
            }
        }
        Some(entry)
    }

    /// Insert or replace an entry and persist.
    pub fn set(&mut self, fingerprint: &str, output: Value, now_ms: u64) -> Result<(), CacheError> {
        self.doc.entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                created_at: now_ms,
                output,
            },
        );
        self.persist()
    }

    /// Remove one entry, or clear the store entirely.
    pub fn invalidate(&mut self, fingerprint: Option<&str>) -> Result<(), CacheError> {
        match fingerprint {
            Some(fp) => {
                self.doc.entries.remove(fp);
            }
            None => self.doc.entries.clear(),
        }
        self.persist()
    }

    pub fn len(&self) -> usize {
        self.doc.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.entries.is_empty()
    }

    /// Write the document atomically: temp file, fsync, rename.
    fn persist(&self) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        let text = serde_json::to_string_pretty(&self.doc)?;
        write_and_sync(&tmp, text.as_bytes())?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn write_and_sync(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    use std::io::Write;
    let mut file = std::fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
