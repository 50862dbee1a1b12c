// SPDX-License-Identifier: MIT

//! Error taxonomy shared across the core components.
//!
//! Component crates define their own `thiserror` error enums for
//! domain-specific failure modes and convert into [`CoreError`] at their
//! public boundary, mirroring the layering between `SessionError`/`AgentError`
//! and a top-level executor error in the teacher workspace.

use thiserror::Error;

/// Per-field validation failure, collected so a single response can report
/// every failing input at once (§7: Validation errors are "surfaced, with
/// per-field list").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Error taxonomy used throughout the core (`spec.md` §7).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0:?}")]
    Validation(Vec<FieldError>),

    #[error("event bus is closed")]
    BusClosed,

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("canceled: {0}")]
    Canceled(String),

    /// A service exited unexpectedly. Published as `service.crashed`, never
    /// returned to a caller directly.
    #[error("child exit: {0}")]
    ChildExit(String),

    #[error("io error: {0}")]
    Io(String),
}

impl CoreError {
    /// Stable machine code for the (external, out-of-scope) HTTP layer to
    /// map to a status code without depending on this crate's variants.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound(_) => "not_found",
            CoreError::Conflict(_) => "conflict",
            CoreError::Validation(_) => "validation",
            CoreError::BusClosed => "bus_closed",
            CoreError::Timeout(_) => "timeout",
            CoreError::Canceled(_) => "canceled",
            CoreError::ChildExit(_) => "child_exit",
            CoreError::Io(_) => "io",
        }
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Io(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
