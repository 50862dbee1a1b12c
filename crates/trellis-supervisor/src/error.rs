// SPDX-License-Identifier: MIT

use thiserror::Error;
use trellis_core::id::ServiceName;
use trellis_core::CoreError;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("unknown service {0}")]
    NotFound(ServiceName),

    #[error("service {0} already running")]
    AlreadyRunning(ServiceName),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SupervisorError> for CoreError {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::NotFound(name) => CoreError::NotFound(name.to_string()),
            SupervisorError::AlreadyRunning(name) => CoreError::Conflict(name.to_string()),
            SupervisorError::Io(err) => CoreError::Io(err.to_string()),
        }
    }
}
