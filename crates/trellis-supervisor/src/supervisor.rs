// SPDX-License-Identifier: MIT

//! Service lifecycle supervisor: start/stop/restart of child processes with
//! restart policies, crash detection, and bounded log capture.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use trellis_bus::EventBus;
use trellis_core::event::Event;
use trellis_core::id::ServiceName;
use trellis_core::output_parser::OutputParser;
use trellis_core::service::{Command as ServiceCommand, RestartPolicy, ServiceDescriptor, ServiceState, StopSignal};
use trellis_core::Clock;

use crate::error::SupervisorError;
use crate::handle::ServiceHandle;

/// Snapshot of one service's observable state, returned by `List`.
#[derive(Debug, Clone)]
pub struct ServiceSummary {
    pub name: ServiceName,
    pub state: ServiceState,
    pub pid: Option<u32>,
    pub restart_count: u32,
}

struct Inner<C: Clock> {
    services: RwLock<HashMap<ServiceName, Arc<ServiceHandle>>>,
    bus: EventBus<C>,
    clock: C,
}

/// Supervises a set of long-running child processes. Cheaply `Clone`: all
/// state lives behind an `Arc`, matching the bus/executor convention.
pub struct Supervisor<C: Clock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for Supervisor<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// How long a service must stay `Running` before its restart counter resets
/// to 0, scaling with how aggressively the service is configured to
/// restart: `restart_delay × 10`, capped at 60s.
fn restart_counter_reset_delay(restart_delay: Duration) -> Duration {
    restart_delay.saturating_mul(10).min(Duration::from_secs(60))
}

fn to_nix_signal(signal: StopSignal) -> Signal {
    match signal {
        StopSignal::Term => Signal::SIGTERM,
        StopSignal::Int => Signal::SIGINT,
        StopSignal::Kill => Signal::SIGKILL,
    }
}

fn build_command(descriptor: &ServiceDescriptor) -> Command {
    let mut cmd = match &descriptor.command {
        ServiceCommand::Shell(s) => {
            let mut c = Command::new("sh");
            c.arg("-c").arg(s);
            c
        }
        ServiceCommand::Argv(argv) => {
            let mut c = Command::new(&argv[0]);
            c.args(&argv[1..]);
            c
        }
    };
    cmd.current_dir(&descriptor.working_dir);
    cmd.envs(descriptor.env.clone());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.process_group(0);
    cmd
}

impl<C: Clock> Supervisor<C> {
    pub fn new(bus: EventBus<C>, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                services: RwLock::new(HashMap::new()),
                bus,
                clock,
            }),
        }
    }

    fn handle(&self, name: &ServiceName) -> Result<Arc<ServiceHandle>, SupervisorError> {
        self.inner
            .services
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| SupervisorError::NotFound(name.clone()))
    }

    fn publish(&self, event: Event) {
        if let Err(e) = self.inner.bus.publish(event) {
            warn!(error = %e, "failed to publish supervisor event");
        }
    }

    /// Replace the whole service set. Services removed from `descriptors`
    /// are stopped; added services are registered but not auto-started;
    /// services whose command/env/cwd changed are stop-then-started.
    pub async fn update_configs(&self, descriptors: Vec<ServiceDescriptor>) -> Result<(), SupervisorError> {
        let new_names: Vec<ServiceName> = descriptors.iter().map(|d| d.name.clone()).collect();

        let removed: Vec<ServiceName> = {
            let services = self.inner.services.read();
            services
                .keys()
                .filter(|name| !new_names.contains(name))
                .cloned()
                .collect()
        };
        for name in &removed {
            let _ = self.stop(name).await;
            self.inner.services.write().remove(name);
        }

        for descriptor in descriptors {
            let existing = self.inner.services.read().get(&descriptor.name).cloned();
            match existing {
                None => {
                    self.inner
                        .services
                        .write()
                        .insert(descriptor.name.clone(), Arc::new(ServiceHandle::new(descriptor)));
                }
                Some(handle) => {
                    let changed = {
                        let current = handle.descriptor.read();
                        current.command != descriptor.command
                            || current.working_dir != descriptor.working_dir
                            || current.env != descriptor.env
                    };
                    *handle.descriptor.write() = descriptor;
                    if changed && handle.state() == ServiceState::Running {
                        let name = handle.name.clone();
                        self.stop(&name).await?;
                        self.start(&name).await?;
                    }
                }
            }
        }
        Ok(())
    }

    pub async fn start(&self, name: &ServiceName) -> Result<(), SupervisorError> {
        let handle = self.handle(name)?;
        if matches!(handle.state(), ServiceState::Running | ServiceState::Starting) {
            return Err(SupervisorError::AlreadyRunning(name.clone()));
        }
        handle.set_state(ServiceState::Starting);
        handle.runtime.lock().logs.clear();

        let descriptor = handle.descriptor.read().clone();
        let mut cmd = build_command(&descriptor);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                handle.set_state(ServiceState::Stopped);
                return Err(SupervisorError::Io(err));
            }
        };

        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        {
            let mut runtime = handle.runtime.lock();
            runtime.pid = pid;
        }

        if let Some(stdout) = stdout {
            spawn_log_capture(handle.clone(), descriptor.parser, stdout, self.inner.clock.clone());
        }
        if let Some(stderr) = stderr {
            spawn_log_capture(handle.clone(), descriptor.parser, stderr, self.inner.clock.clone());
        }

        handle.set_state(ServiceState::Running);
        self.publish(Event::new("service.started").with_payload("service", name.as_str().to_string()));
        info!(service = %name, pid, "service started");

        let supervisor = self.clone();
        let exit_handle = handle.clone();
        let exit_name = name.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            supervisor.on_child_exit(&exit_name, exit_handle, status).await;
        });

        let reset_handle = handle.clone();
        let reset_delay = restart_counter_reset_delay(descriptor.restart_delay);
        tokio::spawn(async move {
            tokio::time::sleep(reset_delay).await;
            if reset_handle.state() == ServiceState::Running {
                reset_handle.runtime.lock().restart_count = 0;
            }
        });

        Ok(())
    }

    async fn on_child_exit(
        &self,
        name: &ServiceName,
        handle: Arc<ServiceHandle>,
        status: std::io::Result<std::process::ExitStatus>,
    ) {
        let exit_code = status.ok().and_then(|s| s.code());
        let was_stopping = handle.state() == ServiceState::Stopping;
        if was_stopping {
            handle.set_state(ServiceState::Stopped);
            return;
        }

        handle.set_state(ServiceState::Crashed);
        let reason = format!("exited with code {:?}", exit_code);
        handle.runtime.lock().last_exit_reason = Some(reason.clone());
        self.publish(
            Event::new("service.crashed")
                .with_payload("service", name.as_str().to_string())
                .with_payload("reason", reason)
                .with_payload("exit_code", exit_code.map(|c| c as i64).unwrap_or(-1)),
        );

        let descriptor = handle.descriptor.read().clone();
        let restart_count = handle.runtime.lock().restart_count;
        let should_restart = match descriptor.restart_policy {
            RestartPolicy::Never => false,
            RestartPolicy::OnFailure => exit_code != Some(0) && restart_count < descriptor.max_restarts,
            RestartPolicy::Always => restart_count < descriptor.max_restarts,
        };
        if !should_restart {
            return;
        }

        handle.runtime.lock().restart_count += 1;
        let supervisor = self.clone();
        let name = name.clone();
        let delay = descriptor.restart_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = supervisor.start(&name).await {
                warn!(service = %name, error = %err, "automatic restart failed");
            }
        });
    }

    pub async fn stop(&self, name: &ServiceName) -> Result<(), SupervisorError> {
        let handle = self.handle(name)?;
        if handle.state() != ServiceState::Running {
            return Ok(());
        }
        handle.set_state(ServiceState::Stopping);

        let pid = handle.runtime.lock().pid;
        let stop_signal = handle.descriptor.read().stop_signal;
        let stop_timeout = handle.descriptor.read().stop_timeout;

        if let Some(pid) = pid {
            let _ = kill(Pid::from_raw(-(pid as i32)), to_nix_signal(stop_signal));
        }

        if !handle.wait_for_state(ServiceState::Stopped, stop_timeout).await {
            if let Some(pid) = pid {
                let _ = kill(Pid::from_raw(-(pid as i32)), Signal::SIGKILL);
            }
            handle
                .wait_for_state(ServiceState::Stopped, Duration::from_secs(10))
                .await;
        }

        self.publish(Event::new("service.stopped").with_payload("service", name.as_str().to_string()));
        Ok(())
    }

    pub async fn restart(&self, name: &ServiceName, trigger: &str) -> Result<(), SupervisorError> {
        info!(service = %name, trigger, "restarting service");
        if self.handle(name)?.state() == ServiceState::Running {
            self.stop(name).await?;
        }
        self.start(name).await
    }

    pub async fn start_all(&self) -> Vec<(ServiceName, Result<(), SupervisorError>)> {
        let names = self.all_names();
        let mut results = Vec::new();
        for name in names {
            results.push((name.clone(), self.start(&name).await));
        }
        results
    }

    pub async fn stop_all(&self) -> Vec<(ServiceName, Result<(), SupervisorError>)> {
        let names = self.all_names();
        let mut results = Vec::new();
        for name in names {
            results.push((name.clone(), self.stop(&name).await));
        }
        results
    }

    pub async fn start_watched(&self) -> Vec<(ServiceName, Result<(), SupervisorError>)> {
        let names = self.watched_names();
        let mut results = Vec::new();
        for name in names {
            results.push((name.clone(), self.start(&name).await));
        }
        results
    }

    pub async fn stop_watched(&self) -> Vec<(ServiceName, Result<(), SupervisorError>)> {
        let names = self.watched_names();
        let mut results = Vec::new();
        for name in names {
            results.push((name.clone(), self.stop(&name).await));
        }
        results
    }

    fn all_names(&self) -> Vec<ServiceName> {
        self.inner.services.read().keys().cloned().collect()
    }

    fn watched_names(&self) -> Vec<ServiceName> {
        self.inner
            .services
            .read()
            .values()
            .filter(|h| h.descriptor.read().watched_binary.is_some())
            .map(|h| h.name.clone())
            .collect()
    }

    pub fn list(&self) -> Vec<ServiceSummary> {
        self.inner
            .services
            .read()
            .values()
            .map(|h| ServiceSummary {
                name: h.name.clone(),
                state: h.state(),
                pid: h.runtime.lock().pid,
                restart_count: h.runtime.lock().restart_count,
            })
            .collect()
    }

    pub fn logs(&self, name: &ServiceName, n: usize) -> Result<Vec<String>, SupervisorError> {
        Ok(self.handle(name)?.runtime.lock().logs.newest_raw(n))
    }

    pub fn parsed_logs(
        &self,
        name: &ServiceName,
        n: usize,
    ) -> Result<Vec<trellis_core::output_parser::ParsedLine>, SupervisorError> {
        Ok(self.handle(name)?.runtime.lock().logs.newest_parsed(n))
    }

    /// Parsed entries paired with their capture timestamp, used by the
    /// crash recorder to correlate entries chronologically.
    pub fn parsed_logs_with_timestamps(
        &self,
        name: &ServiceName,
        n: usize,
    ) -> Result<Vec<(u64, trellis_core::output_parser::ParsedLine)>, SupervisorError> {
        Ok(self.handle(name)?.runtime.lock().logs.newest_parsed_with_timestamps(n))
    }

    /// All currently registered service names, for fan-out reads (e.g. the
    /// crash recorder's cross-service correlation).
    pub fn all_service_names(&self) -> Vec<ServiceName> {
        self.all_names()
    }

    pub fn log_size(&self, name: &ServiceName) -> Result<usize, SupervisorError> {
        Ok(self.handle(name)?.runtime.lock().logs.size_bytes())
    }

    pub fn clear_logs(&self, name: &ServiceName) -> Result<(), SupervisorError> {
        self.handle(name)?.runtime.lock().logs.clear();
        Ok(())
    }
}

fn spawn_log_capture<R, C>(handle: Arc<ServiceHandle>, parser: OutputParser, reader: R, clock: C)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    C: Clock,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let parsed = parser.parse(&line);
                    let now = clock.epoch_ms();
                    let mut runtime = handle.runtime.lock();
                    runtime.logs.append_raw(now, line);
                    if !parsed.is_empty() {
                        runtime.logs.append_parsed(now, parsed);
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(service = %handle.name, error = %err, "log capture stream error");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;
