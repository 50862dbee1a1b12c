// SPDX-License-Identifier: MIT

//! Trellis daemon (trellisd)
//!
//! Background process that owns the event bus, service supervisor,
//! binary watcher, workflow runner, crash recorder and worktree
//! coordinator. An out-of-scope HTTP router is expected to sit in front
//! of [`trellis_daemon::Engine`]; this binary only owns process lifecycle.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use trellis_core::clock::SystemClock;
use trellis_crash::CrashConfig;
use trellis_daemon::{Config, DaemonError, Engine};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("trellisd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("trellisd {}", env!("CARGO_PKG_VERSION"));
                println!("Per-developer service supervisor daemon");
                println!();
                println!("USAGE:");
                println!("    trellisd");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: trellisd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let config = Config::load()?;

    rotate_log_if_needed(&config.log_path);
    write_startup_marker(&config)?;
    let _log_guard = match setup_logging(&config) {
        Ok(guard) => guard,
        Err(err) => {
            write_startup_error(&config, &err);
            return Err(err.into());
        }
    };

    info!("starting trellis daemon");

    let crash_config = CrashConfig {
        reports_dir: config.crash_reports_dir.clone(),
        ..CrashConfig::default()
    };
    let working_dir = config.state_dir.join("work").display().to_string();
    let engine = Engine::new(SystemClock, crash_config, working_dir)?;

    let failures = engine.start_all().await;
    for (name, reason) in &failures {
        error!(service = %name, %reason, "failed to start service at boot");
    }

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!("daemon ready");
    println!("READY");

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down...");
                break;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, shutting down...");
                break;
            }
        }
    }

    let failures = engine.stop_all().await;
    for (name, reason) in &failures {
        error!(service = %name, %reason, "failed to stop service during shutdown");
    }
    info!("daemon stopped");
    Ok(())
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep (trellis.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`]. Shifts
/// `trellis.log` -> `trellis.log.1` -> `trellis.log.2` -> `trellis.log.3`,
/// deleting the oldest. Best-effort: rotation failures are silently
/// ignored so the daemon still starts.
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

/// Startup marker prefix written to the log before anything else, so a
/// CLI tailing the log can find where the current startup attempt begins.
const STARTUP_MARKER_PREFIX: &str = "--- trellisd: starting (pid: ";

fn write_startup_marker(config: &Config) -> Result<(), DaemonError> {
    use std::io::Write;

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)?;
    writeln!(file, "{}{}) ---\n", STARTUP_MARKER_PREFIX, std::process::id())?;
    Ok(())
}

/// Write a startup error synchronously, since the non-blocking tracing
/// writer may not flush before the process exits.
fn write_startup_error(config: &Config, error: &DaemonError) {
    use std::io::Write;

    let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(&config.log_path) else {
        return;
    };
    let _ = writeln!(file, "ERROR failed to start daemon: {error}");
}

fn setup_logging(config: &Config) -> Result<tracing_appender::non_blocking::WorkerGuard, DaemonError> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    if let Some(parent) = config.log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let parent = config.log_path.parent().ok_or(DaemonError::NoStateDir)?;
    let file_name = config.log_path.file_name().ok_or(DaemonError::NoStateDir)?;
    let file_appender = tracing_appender::rolling::never(parent, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
