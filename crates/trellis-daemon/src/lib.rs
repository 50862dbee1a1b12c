// SPDX-License-Identifier: MIT

//! Process wiring for the per-developer service supervisor: constructs
//! every component, cascades worktree activation into them, and owns the
//! process-level startup/logging concerns.

pub mod config;
pub mod engine;
pub mod error;
pub mod template;

pub use config::Config;
pub use engine::{Engine, RawConfig};
pub use error::DaemonError;
