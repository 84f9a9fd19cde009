// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Edit-panel orchestrator daemon (epd).
//!
//! Boots the worker supervisor, the job engine, and the control plane,
//! then runs until SIGTERM/SIGINT. The front-end transport binds to the
//! [`ep_control::ControlPlane`] handle this process owns.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod env;

use crate::env::Config;
use ep_control::ControlPlane;
use ep_core::{SystemClock, UuidIdGen, Worker};
use ep_engine::{Engine, EngineConfig};
use ep_recipes::Catalog;
use ep_storage::PrefsStore;
use ep_supervisor::{ProcessPool, WorkerPool};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("epd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("epd {}", env!("CARGO_PKG_VERSION"));
                println!("Edit-panel orchestrator daemon: supervises the worker");
                println!("processes and runs recipe jobs against them.");
                println!();
                println!("USAGE:");
                println!("    epd");
                println!();
                println!("ENVIRONMENT:");
                println!("    EP_STATE_DIR       state directory (default ~/.local/state/ep)");
                println!("    EP_CATALOG         recipe catalog file (default: embedded)");
                println!("    EP_RESOLVE_CMD     resolve worker launch command");
                println!("    EP_MEDIA_CMD       media worker launch command");
                println!("    EP_PLATFORM_CMD    platform worker launch command");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: epd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;
    std::fs::create_dir_all(&config.state_dir)?;

    rotate_log_if_needed(&config.log_path);
    let _log_guard = setup_logging(&config)?;

    // Single instance per state directory.
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&config.lock_path)?;
    if fs2::FileExt::try_lock_exclusive(&lock_file).is_err() {
        eprintln!("epd is already running for {}", config.state_dir.display());
        std::process::exit(1);
    }

    info!("starting edit-panel orchestrator");

    let catalog = match &config.catalog_path {
        Some(path) => Catalog::load_file(path)?,
        None => Catalog::shipped()?,
    };
    info!(recipes = catalog.len(), "recipe catalog loaded");

    let prefs_store = PrefsStore::new(&config.prefs_path);
    let prefs = prefs_store.load();

    let pool = Arc::new(ProcessPool::new(config.supervisor_config()));
    for worker in Worker::ALL {
        if let Err(e) = pool.start(worker).await {
            // Workers restart with backoff; a failed first spawn is not fatal
            // for the orchestrator itself.
            error!(worker = %worker, error = %e, "initial worker spawn failed");
        }
    }
    let health_task = pool.spawn_health_task();

    let mut engine_config = EngineConfig::new(&config.journal_path, &config.cache_path);
    engine_config.concurrency = Worker::ALL
        .iter()
        .map(|w| (*w, prefs.concurrency_for(*w)))
        .collect();
    let engine = Engine::start(engine_config, Arc::clone(&pool), SystemClock, UuidIdGen)?;

    let plane = ControlPlane::new(engine.clone(), catalog, prefs_store);

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    info!("orchestrator ready");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    // Drain in dependency order: scheduler first, then the workers.
    engine.shutdown().await;
    for worker in Worker::ALL {
        pool.stop(worker).await;
    }
    health_task.abort();
    drop(plane);

    info!("orchestrator stopped");
    Ok(())
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep (epd.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `epd.log` → `epd.log.1` → `epd.log.2` → `epd.log.3`, deleting
/// the oldest. Best-effort: rotation failures never block startup.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };
    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();
    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }
    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

fn setup_logging(
    config: &Config,
) -> Result<tracing_appender::non_blocking::WorkerGuard, std::io::Error> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file_appender = tracing_appender::rolling::never(
        config
            .log_path
            .parent()
            .ok_or_else(|| std::io::Error::other("log path has no parent"))?,
        config
            .log_path
            .file_name()
            .ok_or_else(|| std::io::Error::other("log path has no file name"))?,
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
