// SPDX-License-Identifier: MIT

//! Process-level configuration: where the daemon keeps its log and
//! crash-report state. Service/workflow/worktree configuration itself is
//! supplied programmatically by the caller via [`crate::engine::Engine`];
//! parsing it from a file is out of scope here.

use std::path::PathBuf;

use crate::error::DaemonError;

/// Resolved filesystem layout for one daemon process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. `~/.local/state/trellis`).
    pub state_dir: PathBuf,
    pub log_path: PathBuf,
    pub crash_reports_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self, DaemonError> {
        let state_dir = state_dir()?;
        Ok(Self {
            log_path: state_dir.join("trellis.log"),
            crash_reports_dir: state_dir.join("crash-reports"),
            state_dir,
        })
    }
}

/// Resolve state directory: `TRELLIS_STATE_DIR` > `XDG_STATE_HOME/trellis` >
/// `~/.local/state/trellis`.
fn state_dir() -> Result<PathBuf, DaemonError> {
    if let Ok(dir) = std::env::var("TRELLIS_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("trellis"));
    }
    let home = std::env::var("HOME").map_err(|_| DaemonError::NoStateDir)?;
    Ok(PathBuf::from(home).join(".local/state/trellis"))
}
