// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Normalized failures crossing the worker boundary.
//!
//! Every error that reaches a caller or a subscriber is first converted to a
//! [`WorkerFailure`] carrying one of three categories. The category is what
//! drives retry policy: user errors are never retried, retryable errors
//! consume attempts, fatal errors terminate the step and the job outright.

use serde::{Deserialize, Serialize};

/// Error categories carried across the wire and across function boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Invalid input: missing field, unknown command, misrouted command.
    User,
    /// Transient: worker down, worker exit while pending, timeout.
    Retryable,
    /// Non-retryable worker failure; fails the step and the job.
    Fatal,
}

crate::simple_display! {
    ErrorCategory {
        User => "user",
        Retryable => "retryable",
        Fatal => "fatal",
    }
}

/// A normalized error: category, human-readable message, optional details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{category} error: {message}")]
pub struct WorkerFailure {
    pub category: ErrorCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl WorkerFailure {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::User,
            message: message.into(),
            details: None,
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Retryable,
            message: message.into(),
            details: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Fatal,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category == ErrorCategory::Retryable
    }

    pub fn is_fatal(&self) -> bool {
        self.category == ErrorCategory::Fatal
    }
}

#[cfg(test)]
#[path = "failure_tests.rs"]
mod tests;
