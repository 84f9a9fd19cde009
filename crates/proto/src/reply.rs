// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker reply normalization.
//!
//! Workers answer with one JSON object per line, either a terminal
//! response (tagged with the request `id`) or an id-less event. Some
//! workers still speak the legacy shape where the whole object is the
//! payload and `data` is absent; normalization tolerates both.

use crate::envelope::{RequestId, TraceId};
use ep_core::{ErrorCategory, WorkerFailure};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

/// Latency metrics attached to a normalized response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Worker-reported metrics, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<Value>,
}

/// A terminal response for one pending request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkerFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ReplyMetrics>,
}

/// Kind tag of an id-less worker event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerEventKind {
    Status,
    Progress,
    Message,
}

ep_core::simple_display! {
    WorkerEventKind {
        Status => "status",
        Progress => "progress",
        Message => "message",
    }
}

/// An id-less event fanned out to subscribers; never consumes a pending entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerEvent {
    pub event: WorkerEventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<TraceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
}

/// A classified incoming line from a worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerReply {
    Response(ResponseEnvelope),
    Event(WorkerEvent),
}

/// Classify and normalize one parsed reply.
///
/// - `event` field present → event envelope, no id consumed;
/// - `ok == false` → response with the error normalized to a category
///   (`user` when the worker did not tag one);
/// - otherwise → success, with `data` falling back to the whole raw object
///   for legacy workers.
///
/// `latency_ms`, when known by the caller, lands in `metrics.latency_ms`.
pub fn normalize_reply(raw: Value, latency_ms: Option<u64>) -> WorkerReply {
    let obj = match raw {
        Value::Object(m) => m,
        other => {
            // Unparseable shape: synthesize a failed, id-less response.
            return WorkerReply::Response(ResponseEnvelope {
                id: None,
                ok: false,
                data: None,
                error: Some(WorkerFailure::user(format!(
                    "invalid response: expected a mapping, got {}",
                    crate::envelope::json_kind(&other)
                ))),
                metrics: None,
            });
        }
    };

    if let Some(kind) = obj.get("event").and_then(Value::as_str) {
        // Unknown event kinds degrade to plain messages.
        let event = kind.parse().unwrap_or(WorkerEventKind::Message);
        return WorkerReply::Event(WorkerEvent {
            event,
            trace_id: obj
                .get("trace_id")
                .and_then(Value::as_str)
                .map(TraceId::new),
            code: obj.get("code").and_then(Value::as_str).map(str::to_string),
            data: obj.get("data").cloned().filter(|v| !v.is_null()),
            error: obj.get("error").and_then(Value::as_str).map(str::to_string),
            message: obj
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            metrics: obj.get("metrics").cloned().filter(|v| !v.is_null()),
        });
    }

    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(RequestId::new);
    let ok = obj.get("ok").and_then(Value::as_bool).unwrap_or(true);
    let metrics = Some(ReplyMetrics {
        latency_ms,
        worker: obj.get("metrics").cloned().filter(|v| !v.is_null()),
    });

    if !ok {
        return WorkerReply::Response(ResponseEnvelope {
            id,
            ok: false,
            data: None,
            error: Some(normalize_error(&obj)),
            metrics,
        });
    }

    // Legacy wire: `data` may be absent with the whole object acting as data.
    let data = match obj.get("data") {
        Some(v) if !v.is_null() => v.clone(),
        _ => Value::Object(obj),
    };

    WorkerReply::Response(ResponseEnvelope {
        id,
        ok: true,
        data: Some(data),
        error: None,
        metrics,
    })
}

/// Normalize the error of an `ok: false` response.
///
/// Accepts a plain string `error`, a structured `{category, message,
/// details}` mapping, or a top-level `category` tag next to a string error.
/// A response with no recognizable category defaults to `user`.
fn normalize_error(obj: &serde_json::Map<String, Value>) -> WorkerFailure {
    let top_category = obj
        .get("category")
        .and_then(Value::as_str)
        .and_then(parse_category);

    match obj.get("error") {
        Some(Value::String(message)) => WorkerFailure {
            category: top_category.unwrap_or(ErrorCategory::User),
            message: message.clone(),
            details: None,
        },
        Some(Value::Object(err)) => {
            let category = err
                .get("category")
                .and_then(Value::as_str)
                .and_then(parse_category)
                .or(top_category)
                .unwrap_or(ErrorCategory::User);
            let message = err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("worker error")
                .to_string();
            WorkerFailure {
                category,
                message,
                details: err.get("details").cloned().filter(|v| !v.is_null()),
            }
        }
        _ => WorkerFailure {
            category: top_category.unwrap_or(ErrorCategory::User),
            message: "worker error".to_string(),
            details: None,
        },
    }
}

fn parse_category(s: &str) -> Option<ErrorCategory> {
    match s {
        "user" | "UserError" => Some(ErrorCategory::User),
        "retryable" | "RetryableError" => Some(ErrorCategory::Retryable),
        "fatal" | "FatalError" => Some(ErrorCategory::Fatal),
        _ => None,
    }
}

impl FromStr for WorkerEventKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "status" => Ok(WorkerEventKind::Status),
            "progress" => Ok(WorkerEventKind::Progress),
            "message" => Ok(WorkerEventKind::Message),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
#[path = "reply_tests.rs"]
mod tests;
