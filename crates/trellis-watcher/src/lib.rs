// SPDX-License-Identifier: MIT

//! Filesystem-change-to-service binary watcher.

pub mod error;
pub mod watcher;

pub use error::WatcherError;
pub use watcher::BinaryWatcher;
