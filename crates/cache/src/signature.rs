// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Source-file signatures.
//!
//! A signature captures enough of an input path's state (size, mtime,
//! content checksum) that any change to the input changes the step
//! fingerprint. Directories sign their recursively enumerated files in
//! sorted order; missing paths still contribute distinguishable input.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// Payload keys recognized as carrying input paths.
pub const SOURCE_KEYS: &[&str] = &["folder_path", "path", "file", "source"];

/// Signature of one input path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSignature {
    File {
        path: PathBuf,
        size: u64,
        mtime_ms: u64,
        sha256: String,
    },
    Dir {
        path: PathBuf,
        /// Signatures of contained files, sorted by path.
        entries: Vec<SourceSignature>,
    },
    Missing {
        path: PathBuf,
        exists: bool,
    },
}

/// Compute the signature of a single path.
///
/// IO errors on an existing path degrade to `Missing` rather than failing
/// the fingerprint; the degraded signature still perturbs the hash.
pub fn source_signature(path: &Path) -> SourceSignature {
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => {
            return SourceSignature::Missing {
                path: path.to_path_buf(),
                exists: false,
            }
        }
    };

    if meta.is_dir() {
        let mut entries = Vec::new();
        collect_dir(path, &mut entries);
        entries.sort_by(|a, b| a.path().cmp(b.path()));
        return SourceSignature::Dir {
            path: path.to_path_buf(),
            entries,
        };
    }

    file_signature(path, &meta)
}

fn file_signature(path: &Path, meta: &std::fs::Metadata) -> SourceSignature {
    let mtime_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);

    let sha256 = match std::fs::read(path) {
        Ok(bytes) => {
            let digest = Sha256::digest(&bytes);
            format!("{digest:x}")
        }
        Err(_) => {
            return SourceSignature::Missing {
                path: path.to_path_buf(),
                exists: false,
            }
        }
    };

    SourceSignature::File {
        path: path.to_path_buf(),
        size: meta.len(),
        mtime_ms,
        sha256,
    }
}

fn collect_dir(dir: &Path, out: &mut Vec<SourceSignature>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(t) if t.is_dir() => collect_dir(&path, out),
            Ok(t) if t.is_file() => match std::fs::metadata(&path) {
                Ok(meta) => out.push(file_signature(&path, &meta)),
                Err(_) => out.push(SourceSignature::Missing { path, exists: false }),
            },
            // Symlinks and specials are skipped.
            _ => {}
        }
    }
}

impl SourceSignature {
    pub fn path(&self) -> &Path {
        match self {
            SourceSignature::File { path, .. }
            | SourceSignature::Dir { path, .. }
            | SourceSignature::Missing { path, .. } => path,
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, SourceSignature::Missing { .. })
    }
}

/// Signatures for every recognized path reference in a payload.
///
/// Keys are scanned in [`SOURCE_KEYS`] order, so the result is stable for
/// a given payload.
pub fn signatures_for_payload(payload: &Map<String, Value>) -> Vec<SourceSignature> {
    let mut signatures = Vec::new();
    for key in SOURCE_KEYS {
        if let Some(Value::String(path)) = payload.get(*key) {
            signatures.push(source_signature(Path::new(path)));
        }
    }
    signatures
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
