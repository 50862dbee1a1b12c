// SPDX-License-Identifier: MIT

//! Worktree activation: a coarse mutex serializes switches, a separate
//! read-write lock guards the worktree table, and neither is held while
//! hooks run or events publish.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use trellis_bus::EventBus;
use trellis_core::event::Event;
use trellis_core::id::WorktreeName;
use trellis_core::worktree::{ActivationResult, WorktreeDescriptor};
use trellis_core::Clock;

use crate::error::WorktreeError;

/// Runs before a target worktree is swapped in, while the activation lock
/// is held but the data lock is not — free to call back into the
/// coordinator (e.g. to read the current table).
#[async_trait]
pub trait PreActivateHook: Send + Sync {
    async fn call(&self, target: &WorktreeDescriptor);
}

struct Table {
    worktrees: HashMap<WorktreeName, WorktreeDescriptor>,
    active: Option<WorktreeName>,
}

struct Inner<C: Clock> {
    table: RwLock<Table>,
    activation_lock: AsyncMutex<()>,
    hooks: RwLock<Vec<Arc<dyn PreActivateHook>>>,
    bus: EventBus<C>,
    #[allow(dead_code)]
    clock: C,
}

/// Coordinates the set of registered worktrees and which one is active.
/// Cheaply `Clone`.
pub struct WorktreeCoordinator<C: Clock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for WorktreeCoordinator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Clock> WorktreeCoordinator<C> {
    pub fn new(bus: EventBus<C>, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                table: RwLock::new(Table {
                    worktrees: HashMap::new(),
                    active: None,
                }),
                activation_lock: AsyncMutex::new(()),
                hooks: RwLock::new(Vec::new()),
                bus,
                clock,
            }),
        }
    }

    pub fn register_pre_activate_hook(&self, hook: Arc<dyn PreActivateHook>) {
        self.inner.hooks.write().push(hook);
    }

    pub fn list(&self) -> Vec<WorktreeDescriptor> {
        self.inner.table.read().worktrees.values().cloned().collect()
    }

    pub fn active(&self) -> Option<WorktreeDescriptor> {
        let table = self.inner.table.read();
        table
            .active
            .as_ref()
            .and_then(|name| table.worktrees.get(name).cloned())
    }

    pub fn get_by_name(&self, name: &WorktreeName) -> Option<WorktreeDescriptor> {
        self.inner.table.read().worktrees.get(name).cloned()
    }

    pub fn project_name(&self, name: &WorktreeName) -> Result<String, WorktreeError> {
        self.get_by_name(name)
            .map(|w| w.project_name().to_string())
            .ok_or_else(|| WorktreeError::NotFound(name.clone()))
    }

    pub fn create(&self, descriptor: WorktreeDescriptor) -> Result<(), WorktreeError> {
        let mut table = self.inner.table.write();
        if table.worktrees.contains_key(&descriptor.name) {
            return Err(WorktreeError::AlreadyExists(descriptor.name));
        }
        table.worktrees.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    pub fn remove(&self, name: &WorktreeName) -> Result<(), WorktreeError> {
        let mut table = self.inner.table.write();
        if table.active.as_ref() == Some(name) {
            return Err(WorktreeError::RemoveActive(name.clone()));
        }
        if table.worktrees.remove(name).is_none() {
            return Err(WorktreeError::NotFound(name.clone()));
        }
        Ok(())
    }

    /// Re-reads a worktree's descriptor from the table, unchanged. A seam
    /// for callers that want to confirm a worktree still exists without
    /// triggering activation.
    pub fn refresh(&self, name: &WorktreeName) -> Result<WorktreeDescriptor, WorktreeError> {
        self.get_by_name(name)
            .ok_or_else(|| WorktreeError::NotFound(name.clone()))
    }

    /// Sets the active worktree directly, without running hooks or
    /// publishing events. Used for initial wiring before subscribers are
    /// attached.
    pub fn set_active(&self, name: &WorktreeName) -> Result<(), WorktreeError> {
        let mut table = self.inner.table.write();
        if !table.worktrees.contains_key(name) {
            return Err(WorktreeError::NotFound(name.clone()));
        }
        table.active = Some(name.clone());
        Ok(())
    }

    /// Serialized activation: coarse lock at entry, hooks run outside the
    /// data lock, target re-validated after re-acquiring the write lock,
    /// events published outside any lock.
    pub async fn activate(&self, name: &WorktreeName) -> Result<ActivationResult, WorktreeError> {
        let _guard = self.inner.activation_lock.lock().await;

        let (previous, target) = {
            let table = self.inner.table.read();
            let target = table
                .worktrees
                .get(name)
                .cloned()
                .ok_or_else(|| WorktreeError::NotFound(name.clone()))?;
            (table.active.clone(), target)
        };

        let hooks = self.inner.hooks.read().clone();
        for hook in &hooks {
            hook.call(&target).await;
        }

        {
            let mut table = self.inner.table.write();
            if !table.worktrees.contains_key(name) {
                return Err(WorktreeError::RemovedDuringActivation);
            }
            table.active = Some(name.clone());
        }

        if let Some(prev_name) = &previous {
            if let Some(prev) = self.get_by_name(prev_name) {
                self.publish(Event::new("worktree.deactivating").with_payload(
                    "worktree",
                    serde_json::to_value(&prev).unwrap_or(serde_json::Value::Null),
                ));
            }
        }
        self.publish(Event::new("worktree.activated").with_payload(
            "worktree",
            serde_json::to_value(&target).unwrap_or(serde_json::Value::Null),
        ));

        Ok(ActivationResult {
            previous,
            activated: name.clone(),
        })
    }

    fn publish(&self, event: Event) {
        if let Err(e) = self.inner.bus.publish(event) {
            warn!(error = %e, "failed to publish worktree event");
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
