// SPDX-License-Identifier: MIT

//! Service descriptor and runtime state data model.

use crate::id::ServiceName;
use crate::output_parser::OutputParser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// When a crashed service should be restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    Always,
    OnFailure,
    Never,
}

/// A single command, either a shell string or an argv list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Command {
    Shell(String),
    Argv(Vec<String>),
}

/// Static configuration for one supervised service. Mutable only via
/// `UpdateConfigs`, which may replace the whole set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: ServiceName,
    pub command: Command,
    pub working_dir: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Primary binary path watched for changes; triggers restarts.
    pub watched_binary: Option<String>,
    #[serde(default)]
    pub watched_files: Vec<String>,
    pub restart_policy: RestartPolicy,
    pub max_restarts: u32,
    pub restart_delay: Duration,
    pub stop_signal: StopSignal,
    pub stop_timeout: Duration,
    pub parser: OutputParser,
}

/// Signal sent to a service's process group on `Stop`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StopSignal {
    Term,
    Int,
    Kill,
}

/// Runtime lifecycle state of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

/// Mutable runtime state for one service, owned by the supervisor and
/// mutated under a per-service lock.
#[derive(Debug, Clone)]
pub struct ServiceRuntimeState {
    pub state: ServiceState,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub last_exit_reason: Option<String>,
}

impl ServiceRuntimeState {
    pub fn new() -> Self {
        Self {
            state: ServiceState::Stopped,
            pid: None,
            restart_count: 0,
            last_exit_reason: None,
        }
    }
}

impl Default for ServiceRuntimeState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
