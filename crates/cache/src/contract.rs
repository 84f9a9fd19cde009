// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output-contract validation.
//!
//! Contracts run before a result is accepted as a step success and before
//! it is written to the cache, so stale or hollow worker output never
//! satisfies a step.

use ep_core::{ContractKind, WorkerFailure};
use serde_json::Value;
use std::path::Path;

/// Check `output` against the declared contract.
///
/// Violations come back as retryable failures naming what was missing:
/// a rerun against a healthy worker is the usual remedy.
pub fn validate_contract(kind: ContractKind, output: Option<&Value>) -> Result<(), WorkerFailure> {
    match kind {
        ContractKind::NonNull => match output {
            Some(v) if !v.is_null() => Ok(()),
            _ => Err(violation("output is null")),
        },
        ContractKind::TranscribeOutput => validate_transcribe(output),
    }
}

fn validate_transcribe(output: Option<&Value>) -> Result<(), WorkerFailure> {
    let output = match output {
        Some(v) if !v.is_null() => v,
        _ => return Err(violation("output is null")),
    };

    let outputs = output
        .get("outputs")
        .and_then(Value::as_array)
        .ok_or_else(|| violation("outputs[] missing"))?;
    if outputs.is_empty() {
        return Err(violation("outputs[] is empty"));
    }

    for (i, entry) in outputs.iter().enumerate() {
        let file = entry
            .get("file")
            .and_then(Value::as_str)
            .ok_or_else(|| violation(format!("outputs[{i}].file missing")))?;
        if !Path::new(file).is_file() {
            return Err(violation(format!("source file does not exist: {file}")));
        }

        let paths = entry
            .get("output_paths")
            .and_then(Value::as_array)
            .ok_or_else(|| violation(format!("outputs[{i}].output_paths missing")))?;
        if paths.is_empty() {
            return Err(violation(format!("outputs[{i}].output_paths is empty")));
        }

        for path in paths {
            let path = path
                .as_str()
                .ok_or_else(|| violation(format!("outputs[{i}] has a non-string output path")))?;
            let meta = std::fs::metadata(path)
                .map_err(|_| violation(format!("output file does not exist: {path}")))?;
            if !meta.is_file() || meta.len() == 0 {
                return Err(violation(format!("output file is empty: {path}")));
            }
        }
    }

    Ok(())
}

fn violation(message: impl Into<String>) -> WorkerFailure {
    WorkerFailure::retryable(format!("output contract violation: {}", message.into()))
}

#[cfg(test)]
#[path = "contract_tests.rs"]
mod tests;
