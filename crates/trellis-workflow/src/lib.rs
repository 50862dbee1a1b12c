// SPDX-License-Identifier: MIT

//! Workflow runner: validated, cancellable multi-step command pipelines
//! plus a fixed set of built-in pseudo-workflows.

mod error;
mod runner;

pub use error::WorkflowError;
pub use runner::{RunOptions, RunUpdate, WorkflowRunner};
