// SPDX-License-Identifier: MIT

//! Workflow execution: validated user workflows and a fixed set of
//! built-in pseudo-workflows that delegate straight to the supervisor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use handlebars::Handlebars;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use trellis_bus::EventBus;
use trellis_core::event::Event;
use trellis_core::id::{RunId, WorkflowId};
use trellis_core::output_parser::TestCounts;
use trellis_core::service::ServiceState;
use trellis_core::workflow::{RunState, RunStatus, WorkflowDescriptor, WorkflowStep};
use trellis_core::Clock;
use trellis_supervisor::Supervisor;

use crate::error::WorkflowError;

/// One-shot/streamed update delivered to a run's subscribers.
#[derive(Debug, Clone)]
pub enum RunUpdate {
    Line(String),
    Completed,
}

/// Per-run caller-supplied overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub inputs: HashMap<String, String>,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
    pub restart_services: bool,
    /// Caller's own cancellation context, if any. When set, the run's
    /// token becomes a child of it, so canceling the caller's context
    /// cancels the run too. When absent (the default, and always the
    /// case for runs started from the cascade or from a built-in), the
    /// run gets its own token, decoupled from any caller.
    pub parent_cancel: Option<CancellationToken>,
}

const MAX_LINE_BYTES: usize = 1024 * 1024;
const HTML_RENDER_INTERVAL: Duration = Duration::from_millis(100);
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
const SUBSCRIBER_COMPLETE_TIMEOUT: Duration = Duration::from_secs(5);

const BUILTIN_IDS: &[&str] = &[
    "_start_all",
    "_restart_all",
    "_stop_all",
    "_stop_watched",
    "_clear_logs",
];

struct RunHandle {
    state: Mutex<RunState>,
    cancel: CancellationToken,
    subscribers: Mutex<Vec<(u64, mpsc::Sender<RunUpdate>)>>,
    last_html_render: Mutex<std::time::Instant>,
}

struct Inner<C: Clock> {
    descriptors: RwLock<HashMap<WorkflowId, WorkflowDescriptor>>,
    working_dir: RwLock<String>,
    runs: RwLock<HashMap<RunId, Arc<RunHandle>>>,
    bus: EventBus<C>,
    supervisor: Supervisor<C>,
    clock: C,
    run_seq: AtomicU64,
    sub_seq: AtomicU64,
    sweeper_token: CancellationToken,
    handlebars: Handlebars<'static>,
}

/// Runs workflow descriptors as sequences of steps, decoupled from any
/// caller context. Cheaply `Clone`.
pub struct WorkflowRunner<C: Clock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for WorkflowRunner<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn builtin_descriptor(id: &str) -> WorkflowDescriptor {
    WorkflowDescriptor {
        id: WorkflowId::new(id),
        display_name: id.to_string(),
        steps: Vec::new(),
        timeout: None,
        parser: Default::default(),
        requires_stopped: Vec::new(),
        restart_watched_on_success: false,
        inputs: Vec::new(),
    }
}

impl<C: Clock> WorkflowRunner<C> {
    pub fn new(bus: EventBus<C>, supervisor: Supervisor<C>, clock: C, working_dir: String) -> Self {
        let inner = Arc::new(Inner {
            descriptors: RwLock::new(HashMap::new()),
            working_dir: RwLock::new(working_dir),
            runs: RwLock::new(HashMap::new()),
            bus,
            supervisor,
            clock,
            run_seq: AtomicU64::new(0),
            sub_seq: AtomicU64::new(0),
            sweeper_token: CancellationToken::new(),
            handlebars: Handlebars::new(),
        });
        Self { inner }.spawn_sweeper()
    }

    fn spawn_sweeper(self) -> Self {
        let runner = self.clone();
        let token = self.inner.sweeper_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(SWEEP_INTERVAL) => runner.sweep_completed(),
                }
            }
        });
        self
    }

    fn sweep_completed(&self) {
        let now = self.inner.clock.now();
        self.inner.runs.write().retain(|_, handle| {
            let state = handle.state.lock();
            !(state.completed && state.expires_at.map(|e| now >= e).unwrap_or(false))
        });
    }

    pub fn update_config(&self, descriptors: Vec<WorkflowDescriptor>, working_dir: String) {
        let mut map = HashMap::new();
        for d in descriptors {
            map.insert(d.id.clone(), d);
        }
        *self.inner.descriptors.write() = map;
        *self.inner.working_dir.write() = working_dir;
    }

    pub fn list(&self) -> Vec<WorkflowDescriptor> {
        self.inner.descriptors.read().values().cloned().collect()
    }

    pub fn get(&self, id: &WorkflowId) -> Option<WorkflowDescriptor> {
        self.inner.descriptors.read().get(id).cloned()
    }

    pub fn status(&self, run_id: &RunId) -> Result<RunState, WorkflowError> {
        let runs = self.inner.runs.read();
        let handle = runs
            .get(run_id)
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.clone()))?;
        Ok(handle.state.lock().clone())
    }

    pub fn cancel(&self, run_id: &RunId) -> Result<(), WorkflowError> {
        let runs = self.inner.runs.read();
        let handle = runs
            .get(run_id)
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.clone()))?;
        if handle.state.lock().completed {
            return Err(WorkflowError::RunNotFound(run_id.clone()));
        }
        handle.cancel.cancel();
        Ok(())
    }

    pub fn subscribe(
        &self,
        run_id: &RunId,
        buffer: usize,
    ) -> Result<(u64, mpsc::Receiver<RunUpdate>), WorkflowError> {
        let runs = self.inner.runs.read();
        let handle = runs
            .get(run_id)
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.clone()))?;
        let sub_id = self.inner.sub_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(buffer.max(1));
        handle.subscribers.lock().push((sub_id, tx));
        Ok((sub_id, rx))
    }

    pub fn unsubscribe(&self, run_id: &RunId, sub_id: u64) {
        if let Some(handle) = self.inner.runs.read().get(run_id) {
            handle.subscribers.lock().retain(|(id, _)| *id != sub_id);
        }
    }

    pub fn close(&self) {
        self.inner.sweeper_token.cancel();
    }

    pub async fn run(&self, id: &WorkflowId) -> Result<RunId, WorkflowError> {
        self.run_with_options(id, RunOptions::default()).await
    }

    pub async fn run_with_options(
        &self,
        id: &WorkflowId,
        opts: RunOptions,
    ) -> Result<RunId, WorkflowError> {
        if BUILTIN_IDS.contains(&id.as_str()) {
            return self.run_builtin(id).await;
        }

        let descriptor = self
            .inner
            .descriptors
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| WorkflowError::NotFound(id.clone()))?;

        let errors = descriptor.validate_inputs(&opts.inputs);
        if !errors.is_empty() {
            return Err(WorkflowError::Validation(errors));
        }

        let run_id = self.next_run_id(id);
        let mut state = RunState::new(run_id.clone(), descriptor.clone());
        state.status = RunStatus::Running;
        state.started_at = Some(self.inner.clock.now());
        let cancel = match &opts.parent_cancel {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let handle = Arc::new(RunHandle {
            state: Mutex::new(state),
            cancel,
            subscribers: Mutex::new(Vec::new()),
            last_html_render: Mutex::new(self.inner.clock.now()),
        });
        self.inner.runs.write().insert(run_id.clone(), handle.clone());

        self.publish(
            Event::new("workflow.started")
                .with_payload("run_id", run_id.as_str())
                .with_payload("workflow_id", id.as_str()),
        );

        let runner = self.clone();
        let run_id_task = run_id.clone();
        tokio::spawn(async move {
            runner.execute(run_id_task, descriptor, opts, handle).await;
        });

        Ok(run_id)
    }

    async fn run_builtin(&self, id: &WorkflowId) -> Result<RunId, WorkflowError> {
        match id.as_str() {
            "_start_all" => {
                self.inner.supervisor.start_all().await;
            }
            "_stop_all" => {
                self.inner.supervisor.stop_all().await;
            }
            "_restart_all" => {
                self.inner.supervisor.stop_all().await;
                self.inner.supervisor.start_all().await;
            }
            "_stop_watched" => {
                self.inner.supervisor.stop_watched().await;
            }
            "_clear_logs" => {
                for name in self.inner.supervisor.all_service_names() {
                    let _ = self.inner.supervisor.clear_logs(&name);
                }
            }
            other => return Err(WorkflowError::NotFound(WorkflowId::new(other))),
        }

        let run_id = self.next_run_id(id);
        let now = self.inner.clock.now();
        let mut state = RunState::new(run_id.clone(), builtin_descriptor(id.as_str()));
        state.started_at = Some(now);
        state.mark_completed(RunStatus::Success, now);
        self.inner.runs.write().insert(
            run_id.clone(),
            Arc::new(RunHandle {
                state: Mutex::new(state),
                cancel: CancellationToken::new(),
                subscribers: Mutex::new(Vec::new()),
                last_html_render: Mutex::new(now),
            }),
        );
        Ok(run_id)
    }

    fn next_run_id(&self, id: &WorkflowId) -> RunId {
        let seq = self.inner.run_seq.fetch_add(1, Ordering::SeqCst);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        RunId::new(format!("{}-{nanos}{seq:04}", id.as_str()))
    }

    fn publish(&self, event: Event) {
        if let Err(e) = self.inner.bus.publish(event) {
            warn!(error = %e, "failed to publish workflow event");
        }
    }

    fn expand(&self, template: &str, inputs: &HashMap<String, String>) -> String {
        let ctx = json!({ "Inputs": inputs });
        self.inner
            .handlebars
            .render_template(template, &ctx)
            .unwrap_or_else(|err| {
                warn!(error = %err, template, "failed to expand workflow template, using raw");
                template.to_string()
            })
    }

    async fn execute(
        &self,
        run_id: RunId,
        descriptor: WorkflowDescriptor,
        opts: RunOptions,
        handle: Arc<RunHandle>,
    ) {
        if let Err(reason) = self.check_requires_stopped(&descriptor) {
            self.finish(&run_id, &handle, RunStatus::Failed, None, Some(reason))
                .await;
            return;
        }

        let working_dir = opts
            .working_dir
            .clone()
            .unwrap_or_else(|| self.inner.working_dir.read().clone());
        let deadline = descriptor
            .timeout
            .map(|timeout| self.inner.clock.now() + timeout);

        for (index, step) in descriptor.steps.iter().enumerate() {
            if handle.cancel.is_cancelled() {
                self.finish(&run_id, &handle, RunStatus::Canceled, None, None)
                    .await;
                return;
            }

            let remaining = match deadline {
                Some(d) => {
                    let now = self.inner.clock.now();
                    if now >= d {
                        self.finish(
                            &run_id,
                            &handle,
                            RunStatus::Failed,
                            None,
                            Some("timeout exceeded".to_string()),
                        )
                        .await;
                        return;
                    }
                    Some(d - now)
                }
                None => None,
            };

            let argv = self.expand_step(step, &opts);
            if argv.is_empty() {
                continue;
            }
            let outcome = self
                .run_step(&argv, &working_dir, &opts.env, &handle, &descriptor, remaining)
                .await;

            match outcome {
                StepOutcome::Canceled => {
                    self.finish(&run_id, &handle, RunStatus::Canceled, None, None)
                        .await;
                    return;
                }
                StepOutcome::TimedOut => {
                    self.finish(
                        &run_id,
                        &handle,
                        RunStatus::Failed,
                        None,
                        Some("timeout exceeded".to_string()),
                    )
                    .await;
                    return;
                }
                StepOutcome::Exited(code) if code != 0 => {
                    self.finish(
                        &run_id,
                        &handle,
                        RunStatus::Failed,
                        Some(code),
                        Some(format!("command {index} failed")),
                    )
                    .await;
                    return;
                }
                StepOutcome::Exited(_) => {}
                StepOutcome::SpawnFailed(err) => {
                    self.finish(
                        &run_id,
                        &handle,
                        RunStatus::Failed,
                        None,
                        Some(err),
                    )
                    .await;
                    return;
                }
            }
        }

        if descriptor.restart_watched_on_success {
            self.inner.supervisor.stop_watched().await;
            self.inner.supervisor.start_watched().await;
        }

        self.finish(&run_id, &handle, RunStatus::Success, Some(0), None)
            .await;
    }

    fn check_requires_stopped(&self, descriptor: &WorkflowDescriptor) -> Result<(), String> {
        let running: Vec<String> = descriptor
            .requires_stopped
            .iter()
            .filter(|name| {
                self.inner
                    .supervisor
                    .list()
                    .into_iter()
                    .any(|s| &s.name == *name && s.state != ServiceState::Stopped)
            })
            .map(|name| name.as_str().to_string())
            .collect();
        if running.is_empty() {
            Ok(())
        } else {
            Err(format!("services still running: {}", running.join(", ")))
        }
    }

    fn expand_step(&self, step: &WorkflowStep, opts: &RunOptions) -> Vec<String> {
        step.argv
            .iter()
            .map(|arg| self.expand(arg, &opts.inputs))
            .collect()
    }

    async fn run_step(
        &self,
        argv: &[String],
        working_dir: &str,
        env: &HashMap<String, String>,
        handle: &Arc<RunHandle>,
        descriptor: &WorkflowDescriptor,
        remaining: Option<Duration>,
    ) -> StepOutcome {
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.current_dir(working_dir);
        cmd.envs(env.clone());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => return StepOutcome::SpawnFailed(err.to_string()),
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(256);
        if let Some(stdout) = stdout {
            spawn_line_reader(stdout, tx.clone());
        }
        if let Some(stderr) = stderr {
            spawn_line_reader(stderr, tx.clone());
        }
        drop(tx);

        let runner = self.clone();
        let handle_clone = handle.clone();
        let skip_fanout = descriptor.parser == trellis_core::output_parser::OutputParser::GoTestJson;
        let drain = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                runner.on_line(&handle_clone, line, skip_fanout);
            }
        });

        let result = match remaining {
            Some(remaining) => {
                tokio::select! {
                    _ = handle.cancel.cancelled() => {
                        let _ = child.kill().await;
                        let _ = drain.await;
                        return StepOutcome::Canceled;
                    }
                    res = tokio::time::timeout(remaining, child.wait()) => {
                        match res {
                            Ok(status) => status,
                            Err(_) => {
                                let _ = child.kill().await;
                                let _ = drain.await;
                                return StepOutcome::TimedOut;
                            }
                        }
                    }
                }
            }
            None => {
                tokio::select! {
                    _ = handle.cancel.cancelled() => {
                        let _ = child.kill().await;
                        let _ = drain.await;
                        return StepOutcome::Canceled;
                    }
                    status = child.wait() => status,
                }
            }
        };
        let _ = drain.await;

        match result {
            Ok(status) => StepOutcome::Exited(status.code().unwrap_or(-1)),
            Err(err) => StepOutcome::SpawnFailed(err.to_string()),
        }
    }

    fn on_line(&self, handle: &Arc<RunHandle>, mut line: Vec<u8>, skip_fanout: bool) {
        if line.len() > MAX_LINE_BYTES {
            line.truncate(MAX_LINE_BYTES);
        }
        let text = String::from_utf8_lossy(&line).to_string();

        let truncated_now = {
            let mut state = handle.state.lock();
            let was_truncated = state.output_truncated;
            state.append_output(line.as_slice());
            state.append_output(b"\n");
            !was_truncated && state.output_truncated
        };

        if !skip_fanout {
            let subscribers = handle.subscribers.lock();
            for (_, tx) in subscribers.iter() {
                let _ = tx.try_send(RunUpdate::Line(text.clone()));
            }
        }

        self.maybe_render_html(handle, truncated_now);
    }

    fn maybe_render_html(&self, handle: &Arc<RunHandle>, force: bool) {
        let now = self.inner.clock.now();
        let should_render = {
            let mut last = handle.last_html_render.lock();
            if force || now.duration_since(*last) >= HTML_RENDER_INTERVAL {
                *last = now;
                true
            } else {
                false
            }
        };
        if !should_render {
            return;
        }
        let mut state = handle.state.lock();
        let text = String::from_utf8_lossy(&state.output).to_string();
        let escaped = trellis_core::output_parser::OutputParser::Html.parse(&text);
        state.rendered_html = Some(
            escaped
                .into_iter()
                .map(|l| l.message)
                .collect::<Vec<_>>()
                .join("<br>\n"),
        );
    }

    async fn finish(
        &self,
        run_id: &RunId,
        handle: &Arc<RunHandle>,
        status: RunStatus,
        exit_code: Option<i32>,
        error_message: Option<String>,
    ) {
        let now = self.inner.clock.now();
        let test_counts;
        {
            let mut state = handle.state.lock();
            state.exit_code = exit_code;
            state.error_message = error_message;
            let text = String::from_utf8_lossy(&state.output).to_string();
            state.parsed_lines = state.descriptor.parser.parse(&text);
            test_counts = if state.descriptor.parser == trellis_core::output_parser::OutputParser::GoTestJson {
                Some(TestCounts::from_parsed_lines(&state.parsed_lines))
            } else {
                None
            };
            state.test_counts = test_counts;
            state.mark_completed(status, now);
        }
        self.maybe_render_html(handle, true);

        let mut event = Event::new("workflow.finished")
            .with_payload("run_id", run_id.as_str())
            .with_payload("status", format!("{status:?}").to_lowercase());
        if let Some(counts) = test_counts {
            event = event
                .with_payload("passed", counts.passed)
                .with_payload("failed", counts.failed)
                .with_payload("skipped", counts.skipped);
        }
        self.publish(event);

        info!(run_id = run_id.as_str(), ?status, "workflow run finished");

        let subscribers = handle.subscribers.lock().clone();
        for (_, tx) in subscribers {
            let _ = tokio::time::timeout(SUBSCRIBER_COMPLETE_TIMEOUT, tx.send(RunUpdate::Completed)).await;
        }
    }
}

enum StepOutcome {
    Exited(i32),
    Canceled,
    TimedOut,
    SpawnFailed(String),
}

fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line.into_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(_) => break,
            }
        }
    });
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
