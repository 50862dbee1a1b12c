// SPDX-License-Identifier: MIT

use thiserror::Error;
use trellis_core::id::ServiceName;
use trellis_core::CoreError;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("service {0} is not watched")]
    NotWatched(ServiceName),

    #[error("filesystem watch error: {0}")]
    Notify(#[from] notify::Error),

    #[error("watcher is closed")]
    Closed,
}

impl From<WatcherError> for CoreError {
    fn from(e: WatcherError) -> Self {
        match e {
            WatcherError::NotWatched(name) => CoreError::NotFound(name.to_string()),
            WatcherError::Notify(err) => CoreError::Io(err.to_string()),
            WatcherError::Closed => CoreError::BusClosed,
        }
    }
}
