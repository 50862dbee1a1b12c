// SPDX-License-Identifier: MIT

//! Worktree descriptor data model.

use crate::id::WorktreeName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One registered git worktree and its unexpanded config template context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeDescriptor {
    pub name: WorktreeName,
    pub path: String,
    pub branch: String,
    /// Raw template variables this worktree supplies when config is
    /// re-expanded against it (e.g. `binaries_path`, `port_offset`).
    #[serde(default)]
    pub template_context: HashMap<String, String>,
}

impl WorktreeDescriptor {
    /// Project directory name derived from the worktree path, used to
    /// resolve per-worktree binaries paths.
    pub fn project_name(&self) -> &str {
        self.path
            .rsplit('/')
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.path)
    }
}

/// Outcome of an `Activate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationResult {
    pub previous: Option<WorktreeName>,
    pub activated: WorktreeName,
}

#[cfg(test)]
#[path = "worktree_tests.rs"]
mod tests;
