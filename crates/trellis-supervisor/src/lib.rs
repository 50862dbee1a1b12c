// SPDX-License-Identifier: MIT

//! Service lifecycle supervisor and bounded log capture.

pub mod error;
mod handle;
pub mod log_buffer;
pub mod supervisor;

pub use error::SupervisorError;
pub use log_buffer::LogBuffer;
pub use supervisor::{ServiceSummary, Supervisor};
