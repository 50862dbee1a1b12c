// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("could not determine a state directory (set TRELLIS_STATE_DIR or HOME)")]
    NoStateDir,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("watcher error: {0}")]
    Watcher(#[from] trellis_watcher::WatcherError),
}
