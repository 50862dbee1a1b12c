// SPDX-License-Identifier: MIT

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use trellis_core::id::ServiceName;
use trellis_core::service::{ServiceDescriptor, ServiceState};

use crate::log_buffer::LogBuffer;

/// Fields mutated across the lifetime of one service's process: pid,
/// restart bookkeeping, and its log buffer.
pub(crate) struct RuntimeFields {
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub last_exit_reason: Option<String>,
    pub logs: LogBuffer,
}

impl RuntimeFields {
    fn new() -> Self {
        Self {
            pid: None,
            restart_count: 0,
            last_exit_reason: None,
            logs: LogBuffer::new(4 * 1024 * 1024, 10_000),
        }
    }
}

/// One supervised service: its (replaceable) descriptor, authoritative
/// lifecycle state published through a watch channel, and mutable runtime
/// fields behind a separate lock.
pub(crate) struct ServiceHandle {
    pub name: ServiceName,
    pub descriptor: RwLock<ServiceDescriptor>,
    pub runtime: Mutex<RuntimeFields>,
    pub state_tx: watch::Sender<ServiceState>,
}

impl ServiceHandle {
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        let (state_tx, _rx) = watch::channel(ServiceState::Stopped);
        Self {
            name: descriptor.name.clone(),
            descriptor: RwLock::new(descriptor),
            runtime: Mutex::new(RuntimeFields::new()),
            state_tx,
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state_tx.borrow()
    }

    pub fn set_state(&self, state: ServiceState) {
        let _ = self.state_tx.send(state);
    }

    /// Wait until the handle reaches `target` or `timeout` elapses. Uses a
    /// watch channel so a transition that already happened before this call
    /// started is never missed.
    pub async fn wait_for_state(&self, target: ServiceState, timeout: std::time::Duration) -> bool {
        if self.state() == target {
            return true;
        }
        let mut rx = self.state_tx.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return *rx.borrow() == target;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return *rx.borrow() == target;
                    }
                    if *rx.borrow() == target {
                        return true;
                    }
                }
                _ = tokio::time::sleep(remaining) => {
                    return *rx.borrow() == target;
                }
            }
        }
    }
}
