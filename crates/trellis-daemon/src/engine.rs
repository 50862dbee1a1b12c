// SPDX-License-Identifier: MIT

//! Wiring facade: constructs and cross-connects the bus, supervisor,
//! watcher, crash recorder, worktree coordinator and workflow runner, and
//! owns the unexpanded configuration that the worktree-activation cascade
//! re-renders.
//!
//! This is the programmatic API an out-of-scope HTTP router sits in front
//! of; it performs no I/O of its own beyond what its components need.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use handlebars::Handlebars;
use parking_lot::RwLock;
use tracing::{info, warn};

use trellis_bus::{BusConfig, EventBus};
use trellis_core::event::Event;
use trellis_core::id::ServiceName;
use trellis_core::service::ServiceDescriptor;
use trellis_core::workflow::WorkflowDescriptor;
use trellis_core::worktree::WorktreeDescriptor;
use trellis_core::Clock;
use trellis_crash::{CrashConfig, CrashRecorder};
use trellis_supervisor::Supervisor;
use trellis_watcher::BinaryWatcher;
use trellis_workflow::WorkflowRunner;
use trellis_worktree::WorktreeCoordinator;

use crate::template::{expand_service, expand_working_dir};

/// Unexpanded configuration as supplied by the caller: service/workflow
/// templates with `{{.Worktree.*}}` placeholders intact, re-rendered on
/// every worktree activation.
#[derive(Debug, Clone, Default)]
pub struct RawConfig {
    pub services: Vec<ServiceDescriptor>,
    pub workflows: Vec<WorkflowDescriptor>,
    /// Unexpanded workflow working directory template.
    pub workflow_working_dir: String,
}

/// Ties every component together behind one `Clone`able handle.
pub struct Engine<C: Clock> {
    pub bus: EventBus<C>,
    pub supervisor: Supervisor<C>,
    pub watcher: BinaryWatcher<C>,
    pub crash: CrashRecorder<C>,
    pub worktree: WorktreeCoordinator<C>,
    pub workflow: WorkflowRunner<C>,
    #[allow(dead_code)]
    clock: C,
    handlebars: Arc<Handlebars<'static>>,
    raw: Arc<RwLock<RawConfig>>,
}

impl<C: Clock> Clone for Engine<C> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            supervisor: self.supervisor.clone(),
            watcher: self.watcher.clone(),
            crash: self.crash.clone(),
            worktree: self.worktree.clone(),
            workflow: self.workflow.clone(),
            clock: self.clock.clone(),
            handlebars: self.handlebars.clone(),
            raw: self.raw.clone(),
        }
    }
}

/// Subscribed to `worktree.activated`; performs the reconfiguration
/// cascade. Runs on the bus's dedicated async-subscriber task, which is
/// already a fresh background context distinct from whatever triggered
/// the activation.
struct CascadeHandler<C: Clock> {
    engine: Engine<C>,
}

#[async_trait]
impl<C: Clock> trellis_bus::AsyncEventHandler for CascadeHandler<C> {
    async fn handle(&self, _event: Event) {
        self.engine.apply_active_worktree().await;
    }
}

/// Subscribed to `binary.changed`; restarts the named service. This is the
/// "fs events -> watcher -> bus -> supervisor restart" leg of the data flow.
struct RestartOnChangeHandler<C: Clock> {
    supervisor: Supervisor<C>,
}

#[async_trait]
impl<C: Clock> trellis_bus::AsyncEventHandler for RestartOnChangeHandler<C> {
    async fn handle(&self, event: Event) {
        let Some(service) = event.payload.get("service").and_then(|v| v.as_str()) else {
            return;
        };
        if let Err(err) = self.supervisor.restart(&ServiceName::new(service), "binary.changed").await {
            warn!(service, error = %err, "failed to restart service after binary change");
        }
    }
}

impl<C: Clock> Engine<C> {
    /// Construct every component wired together: the crash recorder
    /// subscribed to `service.crashed`, the cascade handler subscribed to
    /// `worktree.activated`, and the restart handler subscribed to
    /// `binary.changed`.
    pub fn new(clock: C, crash_config: CrashConfig, workflow_working_dir: String) -> Result<Self, crate::error::DaemonError> {
        let bus = EventBus::new(clock.clone(), BusConfig::default());
        let supervisor = Supervisor::new(bus.clone(), clock.clone());
        let watcher = BinaryWatcher::new(bus.clone(), clock.clone())?;
        let crash = CrashRecorder::new(supervisor.clone(), bus.clone(), clock.clone(), crash_config);
        let worktree = WorktreeCoordinator::new(bus.clone(), clock.clone());
        let workflow = WorkflowRunner::new(bus.clone(), supervisor.clone(), clock.clone(), workflow_working_dir);

        crash.subscribe();

        let engine = Self {
            bus,
            supervisor,
            watcher,
            crash,
            worktree,
            workflow,
            clock,
            handlebars: Arc::new(Handlebars::new()),
            raw: Arc::new(RwLock::new(RawConfig::default())),
        };

        let cascade_handler = Arc::new(CascadeHandler {
            engine: engine.clone(),
        });
        engine
            .bus
            .subscribe_async("worktree.activated", cascade_handler, 16)
            .ok();

        let restart_handler = Arc::new(RestartOnChangeHandler {
            supervisor: engine.supervisor.clone(),
        });
        engine
            .bus
            .subscribe_async("binary.changed", restart_handler, 64)
            .ok();

        Ok(engine)
    }

    /// Replace the unexpanded configuration and immediately apply it
    /// against the currently active worktree (if any).
    pub async fn set_raw_config(&self, raw: RawConfig) {
        *self.raw.write() = raw;
        self.apply_active_worktree().await;
    }

    /// Re-expand the stored raw configuration against the active worktree
    /// and push it into every component. Per-service expansion failures
    /// degrade gracefully: a service whose template fails to render keeps
    /// its previous expansion source and is still applied, just unrendered.
    pub async fn apply_active_worktree(&self) {
        let active = self.worktree.active();
        let raw = self.raw.read().clone();

        let expanded_services: Vec<ServiceDescriptor> = raw
            .services
            .iter()
            .map(|s| expand_service(&self.handlebars, s, active.as_ref()))
            .collect();

        if let Err(err) = self.supervisor.update_configs(expanded_services).await {
            warn!(error = %err, "failed to apply service configuration");
        }

        self.reconcile_watches(&raw.services, active.as_ref());

        let working_dir = expand_working_dir(&self.handlebars, &raw.workflow_working_dir, active.as_ref());
        self.workflow.update_config(raw.workflows, working_dir);

        info!(
            worktree = active.as_ref().map(|w| w.name.as_str()).unwrap_or("<none>"),
            "applied configuration cascade"
        );
    }

    /// Re-derive each service's watch set from its (unexpanded, but paths
    /// don't usually carry input-only templates) binary/file list.
    fn reconcile_watches(&self, services: &[ServiceDescriptor], active: Option<&WorktreeDescriptor>) {
        for name in self.watcher.watching() {
            let _ = self.watcher.unwatch(&name);
        }
        for raw in services {
            let expanded = expand_service(&self.handlebars, raw, active);
            let mut paths: Vec<String> = expanded.watched_binary.into_iter().collect();
            paths.extend(expanded.watched_files);
            if paths.is_empty() {
                continue;
            }
            if let Err(err) = self.watcher.watch(&raw.name, paths) {
                warn!(service = %raw.name, error = %err, "failed to (re)register watch");
            }
        }
    }

    /// Start every configured service. Used at daemon startup and after a
    /// worktree-activation cascade.
    pub async fn start_all(&self) -> HashMap<ServiceName, String> {
        self.supervisor
            .start_all()
            .await
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|e| (name, e.to_string())))
            .collect()
    }

    pub async fn stop_all(&self) -> HashMap<ServiceName, String> {
        self.supervisor
            .stop_all()
            .await
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|e| (name, e.to_string())))
            .collect()
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
