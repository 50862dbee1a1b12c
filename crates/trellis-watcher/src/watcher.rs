// SPDX-License-Identifier: MIT

//! Filesystem-change-to-service mapping: per-service debounce and
//! post-restart cooldown, translating `notify` events into restart
//! triggers over the bus.
//!
//! Grounded on the watch-loop idiom of the source adapter's agent watcher:
//! one long-lived dispatcher task per watcher instance, driven by a
//! `notify::RecommendedWatcher` feeding a bounded channel, rather than a
//! fresh task spawned per filesystem event.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use trellis_bus::EventBus;
use trellis_core::event::Event;
use trellis_core::id::ServiceName;
use trellis_core::Clock;

use crate::error::WatcherError;

/// Post-restart cooldown: a `binary.changed` emitted for a service less
/// than this long after the previous one is suppressed, to prevent
/// oscillation when a service's own startup touches its watched binary.
const COOLDOWN: Duration = Duration::from_secs(5);
const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

struct ServiceWatch {
    paths: Vec<PathBuf>,
    /// Bumped on every qualifying fs event; a pending debounce task only
    /// fires if its captured generation is still current when it wakes.
    generation: Arc<AtomicU64>,
    last_emitted_ms: Arc<Mutex<Option<u64>>>,
}

struct Table {
    services: HashMap<ServiceName, ServiceWatch>,
    path_owner: HashMap<PathBuf, ServiceName>,
    path_refcount: HashMap<PathBuf, usize>,
}

struct Inner<C: Clock> {
    table: RwLock<Table>,
    debounce: RwLock<Duration>,
    bus: EventBus<C>,
    clock: C,
    fs_watcher: Mutex<Option<RecommendedWatcher>>,
    dispatcher_token: CancellationToken,
}

/// Binary/file watcher. Cheaply `Clone`.
pub struct BinaryWatcher<C: Clock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for BinaryWatcher<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

fn resolve_absolute(raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if let Ok(canon) = path.canonicalize() {
        return canon;
    }
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

impl<C: Clock> BinaryWatcher<C> {
    pub fn new(bus: EventBus<C>, clock: C) -> Result<Self, WatcherError> {
        let (tx, rx) = mpsc::channel::<NotifyEvent>(256);
        let fs_watcher = notify::recommended_watcher(move |res: notify::Result<NotifyEvent>| match res {
            Ok(event) => {
                let _ = tx.blocking_send(event);
            }
            Err(err) => warn!(error = %err, "filesystem watch error"),
        })?;

        let inner = Arc::new(Inner {
            table: RwLock::new(Table {
                services: HashMap::new(),
                path_owner: HashMap::new(),
                path_refcount: HashMap::new(),
            }),
            debounce: RwLock::new(DEFAULT_DEBOUNCE),
            bus,
            clock,
            fs_watcher: Mutex::new(Some(fs_watcher)),
            dispatcher_token: CancellationToken::new(),
        });

        let watcher = Self { inner };
        watcher.spawn_dispatcher(rx);
        Ok(watcher)
    }

    fn spawn_dispatcher(&self, mut rx: mpsc::Receiver<NotifyEvent>) {
        let watcher = self.clone();
        let token = self.inner.dispatcher_token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = rx.recv() => {
                        match event {
                            Some(event) => watcher.handle_fs_event(event),
                            None => break,
                        }
                    }
                }
            }
        });
    }

    fn handle_fs_event(&self, event: NotifyEvent) {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return;
        }
        for path in &event.paths {
            let service = self.inner.table.read().path_owner.get(path).cloned();
            if let Some(service) = service {
                self.schedule_debounce(service, path.clone());
            }
        }
    }

    fn schedule_debounce(&self, service: ServiceName, path: PathBuf) {
        let generation = {
            let table = self.inner.table.read();
            match table.services.get(&service) {
                Some(watch) => watch.generation.clone(),
                None => return,
            }
        };
        let this_gen = generation.fetch_add(1, Ordering::SeqCst) + 1;
        let debounce = *self.inner.debounce.read();
        let watcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if generation.load(Ordering::SeqCst) != this_gen {
                return; // superseded by a newer event
            }
            watcher.fire(&service, &path);
        });
    }

    fn fire(&self, service: &ServiceName, path: &Path) {
        let last_emitted = {
            let table = self.inner.table.read();
            match table.services.get(service) {
                Some(watch) => watch.last_emitted_ms.clone(),
                None => return,
            }
        };
        let now = self.inner.clock.epoch_ms();
        {
            let mut guard = last_emitted.lock();
            if let Some(prev) = *guard {
                if now.saturating_sub(prev) < COOLDOWN.as_millis() as u64 {
                    debug!(service = %service, "binary.changed suppressed by post-restart cooldown");
                    return;
                }
            }
            *guard = Some(now);
        }

        let event = Event::new("binary.changed")
            .with_payload("service", service.as_str().to_string())
            .with_payload("path", path.to_string_lossy().to_string())
            .with_payload("modTime", now as i64);
        if let Err(err) = self.inner.bus.publish(event) {
            warn!(error = %err, "failed to publish binary.changed");
        }
    }

    /// Replace the watched path set for `service` atomically, re-arming or
    /// releasing filesystem watches as refcounts change.
    pub fn watch(&self, service: &ServiceName, paths: Vec<String>) -> Result<(), WatcherError> {
        let resolved: Vec<PathBuf> = paths.iter().map(|p| resolve_absolute(p)).collect();
        let mut table = self.inner.table.write();
        let mut fs_watcher = self.inner.fs_watcher.lock();
        let fs_watcher = fs_watcher.as_mut().ok_or(WatcherError::Closed)?;

        if let Some(existing) = table.services.remove(service) {
            for path in existing.paths {
                Self::release_path(&mut table, fs_watcher, &path);
            }
        }

        for path in &resolved {
            Self::arm_path(&mut table, fs_watcher, path, service);
        }

        table.services.insert(
            service.clone(),
            ServiceWatch {
                paths: resolved,
                generation: Arc::new(AtomicU64::new(0)),
                last_emitted_ms: Arc::new(Mutex::new(None)),
            },
        );
        Ok(())
    }

    pub fn unwatch(&self, service: &ServiceName) -> Result<(), WatcherError> {
        let mut table = self.inner.table.write();
        let mut fs_watcher = self.inner.fs_watcher.lock();
        let fs_watcher = fs_watcher.as_mut().ok_or(WatcherError::Closed)?;
        let existing = table
            .services
            .remove(service)
            .ok_or_else(|| WatcherError::NotWatched(service.clone()))?;
        for path in existing.paths {
            Self::release_path(&mut table, fs_watcher, &path);
        }
        Ok(())
    }

    fn arm_path(table: &mut Table, fs_watcher: &mut RecommendedWatcher, path: &Path, service: &ServiceName) {
        let refcount = table.path_refcount.entry(path.to_path_buf()).or_insert(0);
        if *refcount == 0 {
            if let Err(err) = fs_watcher.watch(path, RecursiveMode::NonRecursive) {
                warn!(path = %path.display(), error = %err, "failed to arm filesystem watch");
            }
        }
        *refcount += 1;
        table.path_owner.insert(path.to_path_buf(), service.clone());
    }

    fn release_path(table: &mut Table, fs_watcher: &mut RecommendedWatcher, path: &Path) {
        if let Some(refcount) = table.path_refcount.get_mut(path) {
            *refcount -= 1;
            if *refcount == 0 {
                table.path_refcount.remove(path);
                table.path_owner.remove(path);
                let _ = fs_watcher.unwatch(path);
            }
        }
    }

    pub fn watching(&self) -> Vec<ServiceName> {
        self.inner.table.read().services.keys().cloned().collect()
    }

    pub fn set_debounce(&self, duration: Duration) {
        *self.inner.debounce.write() = duration;
    }

    /// Cancel all timers, close the fs watcher, drop both indexes.
    pub fn close(&self) {
        self.inner.dispatcher_token.cancel();
        self.inner.fs_watcher.lock().take();
        let mut table = self.inner.table.write();
        table.services.clear();
        table.path_owner.clear();
        table.path_refcount.clear();
    }
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
