// SPDX-License-Identifier: MIT

use thiserror::Error;
use trellis_core::id::WorktreeName;
use trellis_core::CoreError;

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("unknown worktree {0}")]
    NotFound(WorktreeName),

    #[error("worktree {0} already exists")]
    AlreadyExists(WorktreeName),

    #[error("cannot remove active worktree {0}")]
    RemoveActive(WorktreeName),

    #[error("worktree removed during activation")]
    RemovedDuringActivation,

    #[error("no active worktree")]
    NoActiveWorktree,
}

impl From<WorktreeError> for CoreError {
    fn from(e: WorktreeError) -> Self {
        match e {
            WorktreeError::NotFound(name) => CoreError::NotFound(name.to_string()),
            WorktreeError::AlreadyExists(name) => {
                CoreError::Conflict(format!("worktree {name} already exists"))
            }
            WorktreeError::RemoveActive(name) => {
                CoreError::Conflict(format!("cannot remove active worktree {name}"))
            }
            WorktreeError::RemovedDuringActivation => {
                CoreError::Conflict("worktree removed during activation".to_string())
            }
            WorktreeError::NoActiveWorktree => {
                CoreError::NotFound("no active worktree".to_string())
            }
        }
    }
}
