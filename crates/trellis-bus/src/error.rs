// SPDX-License-Identifier: MIT

use thiserror::Error;
use trellis_core::CoreError;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("event bus is closed")]
    Closed,
}

impl From<BusError> for CoreError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::Closed => CoreError::BusClosed,
        }
    }
}
