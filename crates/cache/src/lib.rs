// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ep-cache: content-addressed step cache.
//!
//! A step's fingerprint hashes the command, the fully interpolated payload,
//! signatures of every input path the payload references, and the relevant
//! tool versions. Identical inputs hash to a byte-identical fingerprint, so
//! a cache hit can short-circuit the worker call entirely.

mod contract;
mod fingerprint;
mod signature;
mod store;

pub use contract::validate_contract;
pub use fingerprint::{canonical_json, fingerprint};
pub use signature::{signatures_for_payload, source_signature, SourceSignature, SOURCE_KEYS};
pub use store::{CacheEntry, CacheStore};

use thiserror::Error;

/// Errors from the persistent cache store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache store parse error: {0}")]
    Json(#[from] serde_json::Error),
}
