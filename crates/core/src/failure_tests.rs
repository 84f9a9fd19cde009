// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[test]
fn constructors_set_category() {
    assert_eq!(WorkerFailure::user("x").category, ErrorCategory::User);
    assert_eq!(
        WorkerFailure::retryable("x").category,
        ErrorCategory::Retryable
    );
    assert_eq!(WorkerFailure::fatal("x").category, ErrorCategory::Fatal);
}

#[test]
fn retryable_predicate() {
    assert!(WorkerFailure::retryable("worker exited").is_retryable());
    assert!(!WorkerFailure::user("missing field").is_retryable());
    assert!(WorkerFailure::fatal("bad config").is_fatal());
}

#[test]
fn display_includes_category_and_message() {
    let failure = WorkerFailure::retryable("media process exited");
    assert_eq!(failure.to_string(), "retryable error: media process exited");
}

#[test]
fn serde_roundtrip_with_details() {
    let failure = WorkerFailure::user("missing required field: folder_path")
        .with_details(json!({"field": "folder_path"}));
    let text = serde_json::to_string(&failure).unwrap();
    let back: WorkerFailure = serde_json::from_str(&text).unwrap();
    assert_eq!(back, failure);
}

#[test]
fn details_omitted_when_absent() {
    let text = serde_json::to_string(&WorkerFailure::fatal("nope")).unwrap();
    assert!(!text.contains("details"));
}

#[test]
fn category_serializes_snake_case() {
    assert_eq!(
        serde_json::to_string(&ErrorCategory::Retryable).unwrap(),
        "\"retryable\""
    );
}
