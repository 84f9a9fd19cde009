// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Canonical request envelopes.

use crate::commands::{command_owner, command_spec, PING};
use crate::ProtoError;
use ep_core::{Worker, WorkerFailure};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

ep_core::define_id! {
    /// Identifies a pending request within one worker.
    pub struct RequestId;
}

ep_core::define_id! {
    /// Opaque correlation id propagated end-to-end for log correlation.
    pub struct TraceId;
}

impl RequestId {
    /// Fresh opaque id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl TraceId {
    /// Fresh opaque id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Reserved top-level envelope fields; everything else in a raw request
/// folds into the payload.
const ENVELOPE_FIELDS: &[&str] = &["id", "worker", "cmd", "payload", "trace_id"];

/// A canonicalized request bound for one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub id: RequestId,
    pub worker: Worker,
    pub cmd: String,
    pub payload: Map<String, Value>,
    pub trace_id: TraceId,
}

impl RequestEnvelope {
    /// Build a validated envelope directly (the engine path, where the
    /// payload is already a mapping and the worker is known).
    pub fn new(
        worker: Worker,
        cmd: impl Into<String>,
        payload: Map<String, Value>,
        trace_id: TraceId,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            worker,
            cmd: cmd.into(),
            payload,
            trace_id,
        }
    }

    /// Canonicalize a raw user request.
    ///
    /// `raw` is either a bare command name or a mapping possibly containing
    /// `cmd`, `payload`, `worker`, `trace_id`, and extra fields. Extra
    /// top-level fields become payload entries, overriding any explicit
    /// `payload` keys of the same name. Missing `id`/`trace_id` get fresh
    /// opaque values. The worker is chosen as
    /// `worker_hint` ∨ `raw.worker` ∨ owner of `raw.cmd`.
    pub fn from_raw(raw: Value, worker_hint: Option<Worker>) -> Result<Self, ProtoError> {
        let obj = match raw {
            Value::String(cmd) => {
                let mut m = Map::new();
                m.insert("cmd".to_string(), Value::String(cmd));
                m
            }
            Value::Object(m) => m,
            other => {
                return Err(WorkerFailure::user(format!(
                    "request must be a command name or a mapping, got {}",
                    json_kind(&other)
                ))
                .into())
            }
        };

        let cmd = match obj.get("cmd") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => {
                return Err(WorkerFailure::user(format!(
                    "cmd must be a string, got {}",
                    json_kind(other)
                ))
                .into())
            }
            None => return Err(WorkerFailure::user("missing required field: cmd").into()),
        };

        let raw_worker = match obj.get("worker") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(
                Worker::from_str(s)
                    .map_err(|e| WorkerFailure::user(e.to_string()))?,
            ),
            Some(other) => {
                return Err(WorkerFailure::user(format!(
                    "worker must be a string, got {}",
                    json_kind(other)
                ))
                .into())
            }
        };

        let worker = worker_hint
            .or(raw_worker)
            .or_else(|| command_owner(&cmd))
            .ok_or_else(|| WorkerFailure::user(format!("unknown command: {cmd}")))?;

        let mut payload = match obj.get("payload") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(m)) => m.clone(),
            Some(other) => {
                return Err(WorkerFailure::user(format!(
                    "payload must be a mapping, got {}",
                    json_kind(other)
                ))
                .into())
            }
        };

        // Extra top-level fields fold into the payload, last-wins.
        for (key, value) in &obj {
            if !ENVELOPE_FIELDS.contains(&key.as_str()) {
                payload.insert(key.clone(), value.clone());
            }
        }

        let id = match obj.get("id") {
            Some(Value::String(s)) if !s.is_empty() => RequestId::new(s.clone()),
            _ => RequestId::generate(),
        };
        let trace_id = match obj.get("trace_id") {
            Some(Value::String(s)) if !s.is_empty() => TraceId::new(s.clone()),
            _ => TraceId::generate(),
        };

        Ok(Self {
            id,
            worker,
            cmd,
            payload,
            trace_id,
        })
    }

    /// Validate routing and the per-command payload schema.
    ///
    /// Failures are always `user` category and name the offending field.
    pub fn validate(&self) -> Result<(), ProtoError> {
        if self.cmd.is_empty() {
            return Err(WorkerFailure::user("missing required field: cmd").into());
        }

        // ping is owned by every worker.
        if self.cmd == PING {
            return Ok(());
        }

        let spec = command_spec(&self.cmd)
            .ok_or_else(|| WorkerFailure::user(format!("unknown command: {}", self.cmd)))?;

        if spec.owner != self.worker {
            return Err(WorkerFailure::user(format!(
                "command {} is owned by worker {}, not {}",
                self.cmd, spec.owner, self.worker
            ))
            .into());
        }

        for field in spec.fields {
            match self.payload.get(field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(WorkerFailure::user(format!(
                        "missing required field: {}",
                        field.name
                    ))
                    .into());
                }
                None | Some(Value::Null) => {}
                Some(value) => {
                    if !field.kind.matches(value) {
                        return Err(WorkerFailure::user(format!(
                            "field {} must be a {}, got {}",
                            field.name,
                            field.kind.as_str(),
                            json_kind(value)
                        ))
                        .into());
                    }
                }
            }
        }

        Ok(())
    }

    /// Serialize the single wire line sent to the worker.
    ///
    /// Payload fields are flattened at top level next to `id`, `cmd`, and
    /// `trace_id` (the shape workers have always consumed). The returned
    /// string contains no newline.
    pub fn to_wire_line(&self) -> Result<String, ProtoError> {
        let mut wire = Map::new();
        wire.insert("id".to_string(), Value::String(self.id.0.clone()));
        wire.insert("cmd".to_string(), Value::String(self.cmd.clone()));
        wire.insert(
            "trace_id".to_string(),
            Value::String(self.trace_id.0.clone()),
        );
        for (key, value) in &self.payload {
            // Envelope fields win over payload entries of the same name.
            if !matches!(key.as_str(), "id" | "cmd" | "trace_id") {
                wire.insert(key.clone(), value.clone());
            }
        }
        Ok(serde_json::to_string(&Value::Object(wire))?)
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
