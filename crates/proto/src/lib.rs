// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ep-proto: request/response envelopes and the command router.
//!
//! Wire format to workers: one JSON object per line with payload fields
//! flattened at top level (historical compatibility). Replies are either a
//! terminal response tagged with the request `id`, or an id-less event.

mod commands;
mod envelope;
mod reply;

pub use commands::{command_owner, command_spec, CommandSpec, FieldKind, FieldSpec, PING};
pub use envelope::{RequestEnvelope, RequestId, TraceId};
pub use reply::{normalize_reply, ReplyMetrics, ResponseEnvelope, WorkerEvent, WorkerEventKind, WorkerReply};

use ep_core::WorkerFailure;
use thiserror::Error;

/// Errors from envelope construction, validation, and serialization.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Validation failure, always a `user` category failure naming the field.
    #[error(transparent)]
    Invalid(#[from] WorkerFailure),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
