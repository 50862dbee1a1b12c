// SPDX-License-Identifier: MIT

//! In-memory event bus — the nervous system every other component
//! publishes to or subscribes on.

pub mod bus;
pub mod config;
pub mod error;

pub use bus::{AsyncEventHandler, EventBus, SubscriptionId};
pub use config::BusConfig;
pub use error::BusError;
