// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Closed command-ownership table and per-command payload schemas.
//!
//! Every command is owned by exactly one worker; the router rejects a
//! request whose envelope names any other worker. `ping` is the one
//! exception: every worker implements it for health checks.

use ep_core::Worker;

/// Health-check command accepted by every worker.
pub const PING: &str = "ping";

/// Scalar kind a payload field must have when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Str,
    Bool,
    Num,
}

impl FieldKind {
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldKind::Str => value.is_string(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Num => value.is_number(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Str => "string",
            FieldKind::Bool => "boolean",
            FieldKind::Num => "number",
        }
    }
}

/// One declared payload field.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn req(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
    }
}

const fn opt(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

/// Schema of one command: its owning worker and declared payload fields.
///
/// Fields not declared here pass through unchecked (workers tolerate
/// extra payload entries).
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub cmd: &'static str,
    pub owner: Worker,
    pub fields: &'static [FieldSpec],
}

/// The closed set of routable commands.
static COMMANDS: &[CommandSpec] = &[
    // -- resolve --
    CommandSpec {
        cmd: "connect",
        owner: Worker::Resolve,
        fields: &[],
    },
    CommandSpec {
        cmd: "context",
        owner: Worker::Resolve,
        fields: &[],
    },
    CommandSpec {
        cmd: "add_marker",
        owner: Worker::Resolve,
        fields: &[
            opt("frame", FieldKind::Num),
            opt("color", FieldKind::Str),
            opt("note", FieldKind::Str),
        ],
    },
    CommandSpec {
        cmd: "start_render",
        owner: Worker::Resolve,
        fields: &[opt("preset", FieldKind::Str), opt("output_dir", FieldKind::Str)],
    },
    CommandSpec {
        cmd: "stop_render",
        owner: Worker::Resolve,
        fields: &[],
    },
    CommandSpec {
        cmd: "create_project_bins",
        owner: Worker::Resolve,
        fields: &[opt("project", FieldKind::Str)],
    },
    CommandSpec {
        cmd: "update_text",
        owner: Worker::Resolve,
        fields: &[req("text", FieldKind::Str), opt("item_id", FieldKind::Str)],
    },
    CommandSpec {
        cmd: "goto",
        owner: Worker::Resolve,
        fields: &[opt("timecode", FieldKind::Str), opt("frame", FieldKind::Num)],
    },
    CommandSpec {
        cmd: "spellcheck",
        owner: Worker::Resolve,
        fields: &[req("text", FieldKind::Str)],
    },
    CommandSpec {
        cmd: "lp_base_export",
        owner: Worker::Resolve,
        fields: &[opt("output_dir", FieldKind::Str), opt("preset", FieldKind::Str)],
    },
    CommandSpec {
        cmd: "shutdown",
        owner: Worker::Resolve,
        fields: &[],
    },
    // -- media --
    CommandSpec {
        cmd: "transcribe",
        owner: Worker::Media,
        fields: &[
            req("file", FieldKind::Str),
            opt("use_gpu", FieldKind::Bool),
            opt("engine", FieldKind::Str),
        ],
    },
    CommandSpec {
        cmd: "transcribe_folder",
        owner: Worker::Media,
        fields: &[
            req("folder_path", FieldKind::Str),
            opt("use_gpu", FieldKind::Bool),
            opt("engine", FieldKind::Str),
        ],
    },
    CommandSpec {
        cmd: "test_cuda",
        owner: Worker::Media,
        fields: &[],
    },
    // -- platform --
    CommandSpec {
        cmd: "leaderpass_auth",
        owner: Worker::Platform,
        fields: &[opt("token", FieldKind::Str)],
    },
    CommandSpec {
        cmd: "leaderpass_upload",
        owner: Worker::Platform,
        fields: &[
            req("file_path", FieldKind::Str),
            opt("chunk_size", FieldKind::Num),
        ],
    },
];

/// Look up the full schema for a command. `None` for unknown commands.
pub fn command_spec(cmd: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.cmd == cmd)
}

/// The worker owning a command. `None` for `ping` (valid on every worker)
/// and for unknown commands.
pub fn command_owner(cmd: &str) -> Option<Worker> {
    command_spec(cmd).map(|c| c.owner)
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
