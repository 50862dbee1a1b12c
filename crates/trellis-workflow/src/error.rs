// SPDX-License-Identifier: MIT

use thiserror::Error;
use trellis_core::error::FieldError;
use trellis_core::id::{RunId, WorkflowId};
use trellis_core::CoreError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unknown workflow {0}")]
    NotFound(WorkflowId),

    #[error("unknown run {0}")]
    RunNotFound(RunId),

    #[error("validation failed: {0:?}")]
    Validation(Vec<FieldError>),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WorkflowError> for CoreError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::NotFound(id) => CoreError::NotFound(id.to_string()),
            WorkflowError::RunNotFound(id) => CoreError::NotFound(id.to_string()),
            WorkflowError::Validation(errs) => CoreError::Validation(errs),
            WorkflowError::Io(err) => CoreError::Io(err.to_string()),
        }
    }
}
