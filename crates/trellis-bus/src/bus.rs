// SPDX-License-Identifier: MIT

//! In-memory event bus: pattern subscriptions, bounded retained history,
//! sync and async delivery, age-based pruning.

use crate::error::BusError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use trellis_core::event::{Event, EventFilter, Pattern};
use trellis_core::id::EventId;
use trellis_core::{Clock, IdGen, UuidIdGen};

use crate::config::BusConfig;

/// Opaque subscription handle returned by `Subscribe`/`SubscribeAsync`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handler invoked on the publisher's thread of control for sync
/// subscriptions. Wrapped in a fault boundary: a panicking handler is
/// caught, logged, and never propagated to the publisher.
pub type SyncHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handler invoked asynchronously, sequentially, by a dedicated worker task
/// per subscription.
#[async_trait]
pub trait AsyncEventHandler: Send + Sync {
    async fn handle(&self, event: Event);
}

enum Mode {
    Sync(SyncHandler),
    Async(mpsc::Sender<Event>),
}

struct SubscriptionEntry {
    id: SubscriptionId,
    pattern: Pattern,
    mode: Mode,
}

struct BusInner {
    history: VecDeque<Event>,
    subscriptions: Vec<SubscriptionEntry>,
    default_worktree: String,
    closed: bool,
    event_seq: u64,
}

/// In-memory pub/sub bus. Generic over [`Clock`] so tests can control
/// timestamps and pruning deterministically.
pub struct EventBus<C: Clock> {
    inner: Arc<Mutex<BusInner>>,
    clock: C,
    config: BusConfig,
    next_sub_id: Arc<AtomicU64>,
    pruner_token: CancellationToken,
    id_gen: Arc<dyn IdGen>,
}

impl<C: Clock> Clone for EventBus<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            clock: self.clock.clone(),
            config: self.config.clone(),
            next_sub_id: self.next_sub_id.clone(),
            pruner_token: self.pruner_token.clone(),
            id_gen: self.id_gen.clone(),
        }
    }
}

impl<C: Clock> EventBus<C> {
    /// Construct a bus and spawn its background history pruner. Must be
    /// called from within a `tokio` runtime. Event ids are generated by
    /// [`UuidIdGen`]; use [`EventBus::new_with_id_gen`] to substitute a
    /// deterministic generator in tests.
    pub fn new(clock: C, config: BusConfig) -> Self {
        Self::new_with_id_gen(clock, config, Arc::new(UuidIdGen))
    }

    /// Construct a bus with an explicit [`IdGen`], e.g. a `SequentialIdGen`
    /// for assertions on predictable event ids.
    pub fn new_with_id_gen(clock: C, config: BusConfig, id_gen: Arc<dyn IdGen>) -> Self {
        let bus = Self {
            inner: Arc::new(Mutex::new(BusInner {
                history: VecDeque::new(),
                subscriptions: Vec::new(),
                default_worktree: String::new(),
                closed: false,
                event_seq: 0,
            })),
            clock,
            config,
            next_sub_id: Arc::new(AtomicU64::new(1)),
            pruner_token: CancellationToken::new(),
            id_gen,
        };
        bus.spawn_pruner();
        bus
    }

    fn spawn_pruner(&self) {
        let inner = self.inner.clone();
        let clock = self.clock.clone();
        let max_age_ms = self.config.max_history_age.as_millis() as u64;
        let interval = self.config.pruner_interval();
        let token = self.pruner_token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = clock.epoch_ms();
                        let cutoff = now.saturating_sub(max_age_ms);
                        let mut guard = inner.lock();
                        let before = guard.history.len();
                        guard.history.retain(|e| e.timestamp_ms >= cutoff);
                        let removed = before - guard.history.len();
                        if removed > 0 {
                            debug!(removed, "pruned expired events from history");
                        }
                    }
                }
            }
        });
    }

    /// Publish an event, filling in id/version/timestamp/worktree if
    /// absent, then deliver to a snapshot of matching subscribers.
    pub fn publish(&self, mut event: Event) -> Result<(), BusError> {
        let matching = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(BusError::Closed);
            }
            if event.id.as_str().is_empty() {
                inner.event_seq += 1;
                event.id = EventId::new(format!("{}-{}", self.id_gen.next(), inner.event_seq));
            }
            if event.schema_version == 0 {
                event.schema_version = 1;
            }
            if event.timestamp_ms == 0 {
                event.timestamp_ms = self.clock.epoch_ms();
            }
            if event.worktree.is_empty() {
                event.worktree = inner.default_worktree.clone();
            }

            inner.history.push_back(event.clone());
            while inner.history.len() > self.config.max_history_events {
                inner.history.pop_front();
            }

            inner
                .subscriptions
                .iter()
                .filter(|s| s.pattern.matches(&event.event_type))
                .map(|s| (s.id, clone_mode(&s.mode)))
                .collect::<Vec<_>>()
        };

        for (id, mode) in matching {
            match mode {
                Mode::Sync(handler) => {
                    let result = catch_unwind(AssertUnwindSafe(|| handler(&event)));
                    if result.is_err() {
                        warn!(subscription = id.0, "sync event handler panicked");
                    }
                }
                Mode::Async(tx) => {
                    if tx.try_send(event.clone()).is_err() {
                        warn!(subscription = id.0, event_type = %event.event_type, "dropping event for slow async subscriber");
                    }
                }
            }
        }
        Ok(())
    }

    /// Register a synchronous handler invoked on the publisher's thread.
    pub fn subscribe(
        &self,
        pattern: &str,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Result<SubscriptionId, BusError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(BusError::Closed);
        }
        let id = SubscriptionId(self.next_sub_id.fetch_add(1, Ordering::SeqCst));
        inner.subscriptions.push(SubscriptionEntry {
            id,
            pattern: Pattern::compile(pattern),
            mode: Mode::Sync(Arc::new(handler)),
        });
        Ok(id)
    }

    /// Register an asynchronous handler. Events are delivered over a
    /// bounded channel drained sequentially by a dedicated worker task; if
    /// the channel is full, the event is dropped for this subscriber.
    pub fn subscribe_async(
        &self,
        pattern: &str,
        handler: Arc<dyn AsyncEventHandler>,
        buffer_size: usize,
    ) -> Result<SubscriptionId, BusError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(BusError::Closed);
        }
        let id = SubscriptionId(self.next_sub_id.fetch_add(1, Ordering::SeqCst));
        let (tx, mut rx) = mpsc::channel::<Event>(buffer_size.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                handler.handle(event).await;
            }
        });
        inner.subscriptions.push(SubscriptionEntry {
            id,
            pattern: Pattern::compile(pattern),
            mode: Mode::Async(tx),
        });
        Ok(id)
    }

    /// Remove a subscription. For async subscriptions, dropping the sender
    /// lets the worker task drain any buffered events before exiting.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock();
        inner.subscriptions.retain(|s| s.id != id);
    }

    /// Query retained history. Patterns are OR-ed; all other filter fields
    /// are ANDed. `limit` keeps the newest matches.
    pub fn history(&self, filter: &EventFilter) -> Vec<Event> {
        let inner = self.inner.lock();
        let mut matches: Vec<Event> = inner
            .history
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = filter.limit {
            if matches.len() > limit {
                matches.drain(0..matches.len() - limit);
            }
        }
        matches
    }

    pub fn set_default_worktree(&self, name: impl Into<String>) {
        self.inner.lock().default_worktree = name.into();
    }

    /// Idempotent. Stops the pruner, drains and closes all async
    /// subscriptions, clears the subscription table, and releases history.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        self.pruner_token.cancel();
        inner.subscriptions.clear();
        inner.history.clear();
    }
}

fn clone_mode(mode: &Mode) -> Mode {
    match mode {
        Mode::Sync(handler) => Mode::Sync(handler.clone()),
        Mode::Async(tx) => Mode::Async(tx.clone()),
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
