// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon configuration from the environment.

use ep_core::Worker;
use ep_supervisor::{SpawnSpec, SupervisorConfig};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not determine a state directory (set EP_STATE_DIR)")]
    NoStateDir,
    #[error("worker command for {worker} is empty (check {var})")]
    EmptyWorkerCommand { worker: Worker, var: &'static str },
}

/// Resolved daemon paths and worker launch commands.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
    pub log_path: PathBuf,
    pub lock_path: PathBuf,
    pub journal_path: PathBuf,
    pub cache_path: PathBuf,
    pub prefs_path: PathBuf,
    /// User-supplied catalog document; the embedded catalog when absent.
    pub catalog_path: Option<PathBuf>,
    pub workers: HashMap<Worker, SpawnSpec>,
}

/// Environment variable naming the launch command for a worker.
fn command_var(worker: Worker) -> &'static str {
    match worker {
        Worker::Resolve => "EP_RESOLVE_CMD",
        Worker::Media => "EP_MEDIA_CMD",
        Worker::Platform => "EP_PLATFORM_CMD",
    }
}

/// Default launch command per worker.
fn default_command(worker: Worker) -> &'static str {
    match worker {
        Worker::Resolve => "ep-resolve-worker",
        Worker::Media => "ep-media-worker",
        Worker::Platform => "ep-platform-worker",
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let state_dir = match std::env::var_os("EP_STATE_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::state_dir()
                .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
                .ok_or(ConfigError::NoStateDir)?
                .join("ep"),
        };

        let mut workers = HashMap::new();
        for worker in Worker::ALL {
            let var = command_var(worker);
            let raw = std::env::var(var).unwrap_or_else(|_| default_command(worker).to_string());
            workers.insert(worker, parse_spawn_spec(worker, &raw, var)?);
        }

        Ok(Self {
            log_path: state_dir.join("epd.log"),
            lock_path: state_dir.join("epd.lock"),
            journal_path: state_dir.join("jobs.jsonl"),
            cache_path: state_dir.join("step_cache.json"),
            prefs_path: state_dir.join("preferences.json"),
            catalog_path: std::env::var_os("EP_CATALOG").map(PathBuf::from),
            state_dir,
            workers,
        })
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::new(self.workers.clone())
    }
}

/// Split a whitespace-separated launch command into program and args.
fn parse_spawn_spec(
    worker: Worker,
    raw: &str,
    var: &'static str,
) -> Result<SpawnSpec, ConfigError> {
    let mut parts = raw.split_whitespace();
    let program = parts
        .next()
        .ok_or(ConfigError::EmptyWorkerCommand { worker, var })?;
    let mut spec = SpawnSpec::new(program);
    for arg in parts {
        spec = spec.arg(arg);
    }
    Ok(spec)
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
