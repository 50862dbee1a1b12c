// SPDX-License-Identifier: MIT

use thiserror::Error;
use trellis_core::id::CrashId;
use trellis_core::CoreError;

#[derive(Debug, Error)]
pub enum CrashError {
    #[error("unknown crash report {0}")]
    NotFound(CrashId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<CrashError> for CoreError {
    fn from(e: CrashError) -> Self {
        match e {
            CrashError::NotFound(id) => CoreError::NotFound(id.to_string()),
            CrashError::Io(err) => CoreError::Io(err.to_string()),
            CrashError::Serde(err) => CoreError::Io(err.to_string()),
        }
    }
}
