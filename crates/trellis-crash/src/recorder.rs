// SPDX-License-Identifier: MIT

//! Crash recorder: on `service.crashed`, builds a correlated, retained
//! report from every service's recent parsed log output.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use trellis_bus::{AsyncEventHandler, EventBus, SubscriptionId};
use trellis_core::crash::{CrashHistogram, CrashLogEntry, CrashRecord};
use trellis_core::event::Event;
use trellis_core::id::{CrashId, ServiceName};
use trellis_core::Clock;
use trellis_supervisor::Supervisor;

use crate::config::CrashConfig;
use crate::error::CrashError;

const ENTRIES_PER_SERVICE: usize = 500;

struct Inner<C: Clock> {
    config: RwLock<CrashConfig>,
    records: RwLock<Vec<CrashRecord>>,
    supervisor: Supervisor<C>,
    bus: EventBus<C>,
    clock: C,
    subscription: Mutex<Option<SubscriptionId>>,
}

/// Cheaply `Clone` crash recorder.
pub struct CrashRecorder<C: Clock> {
    inner: Arc<Inner<C>>,
}

impl<C: Clock> Clone for CrashRecorder<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct CrashHandler<C: Clock> {
    inner: Arc<Inner<C>>,
}

#[async_trait]
impl<C: Clock> AsyncEventHandler for CrashHandler<C> {
    async fn handle(&self, event: Event) {
        if let Err(err) = on_crash(&self.inner, event).await {
            warn!(error = %err, "failed to record crash");
        }
    }
}

impl<C: Clock> CrashRecorder<C> {
    pub fn new(supervisor: Supervisor<C>, bus: EventBus<C>, clock: C, config: CrashConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                records: RwLock::new(Vec::new()),
                supervisor,
                bus,
                clock,
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Attach to the bus. Idempotent: a second call replaces the previous
    /// subscription.
    pub fn subscribe(&self) {
        let handler = Arc::new(CrashHandler {
            inner: self.inner.clone(),
        });
        match self.inner.bus.subscribe_async("service.crashed", handler, 64) {
            Ok(id) => *self.inner.subscription.lock() = Some(id),
            Err(err) => warn!(error = %err, "crash recorder failed to subscribe"),
        }
    }

    pub fn list(&self) -> Vec<CrashRecord> {
        self.inner.records.read().clone()
    }

    pub fn get(&self, id: &CrashId) -> Option<CrashRecord> {
        self.inner
            .records
            .read()
            .iter()
            .find(|r| &r.id == id)
            .cloned()
    }

    pub fn newest(&self) -> Option<CrashRecord> {
        self.inner.records.read().last().cloned()
    }

    pub fn delete(&self, id: &CrashId) -> Result<(), CrashError> {
        let mut records = self.inner.records.write();
        let before = records.len();
        records.retain(|r| &r.id != id);
        if records.len() == before {
            return Err(CrashError::NotFound(id.clone()));
        }
        let path = self.inner.config.read().reports_dir.join(format!("{id}.json"));
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn clear(&self) {
        self.inner.records.write().clear();
    }

    pub fn update_config(&self, config: CrashConfig) {
        *self.inner.config.write() = config;
    }

    pub fn update_service_id_fields(&self, fields: HashMap<ServiceName, String>) {
        self.inner.config.write().id_field_overrides = fields;
    }
}

async fn on_crash<C: Clock>(inner: &Arc<Inner<C>>, event: Event) -> Result<(), CrashError> {
    let Some(service_name) = event
        .payload
        .get("service")
        .and_then(|v| v.as_str())
        .map(ServiceName::new)
    else {
        return Ok(());
    };
    let exit_code = event
        .payload
        .get("exit_code")
        .and_then(|v| v.as_i64())
        .map(|c| c as i32);
    let trigger = event
        .payload
        .get("reason")
        .and_then(|v| v.as_str())
        .unwrap_or("service exited unexpectedly")
        .to_string();

    let config = inner.config.read().clone();
    let mut entries_by_service: HashMap<ServiceName, Vec<CrashLogEntry>> = HashMap::new();
    for name in inner.supervisor.all_service_names() {
        let parsed = inner
            .supervisor
            .parsed_logs_with_timestamps(&name, ENTRIES_PER_SERVICE)
            .unwrap_or_default();
        let entries = parsed
            .into_iter()
            .map(|(ts, line)| CrashLogEntry {
                service: name.clone(),
                timestamp_ms: ts,
                line,
            })
            .collect();
        entries_by_service.insert(name, entries);
    }

    let crashing_entries = entries_by_service
        .get(&service_name)
        .cloned()
        .unwrap_or_default();

    let stack = config.stack_field.as_ref().and_then(|field| {
        crashing_entries
            .iter()
            .rev()
            .find_map(|e| e.line.fields.get(field).cloned())
    });

    let crash_id_field = config.id_field_for(&service_name).to_string();
    let crash_trace_id = crashing_entries
        .last()
        .and_then(|e| e.line.fields.get(&crash_id_field).cloned());

    let preferred_trace_id = crashing_entries
        .iter()
        .rev()
        .skip(1)
        .find_map(|e| {
            e.line.fields.get(&crash_id_field).and_then(|v| {
                if Some(v) != crash_trace_id.as_ref() {
                    Some(v.clone())
                } else {
                    None
                }
            })
        })
        .or_else(|| crash_trace_id.clone());

    let entries = match &preferred_trace_id {
        Some(trace_id) => {
            let mut correlated = Vec::new();
            for (name, entries) in &entries_by_service {
                let id_field = config.id_field_for(name);
                for entry in entries {
                    if entry.line.fields.get(id_field) == Some(trace_id) {
                        correlated.push(entry.clone());
                    }
                }
            }
            correlated
        }
        None => crashing_entries,
    };
    let mut entries = entries;
    entries.sort_by_key(|e| e.timestamp_ms);
    let histogram = CrashHistogram::from_entries(&entries);

    let id = CrashRecord::format_id(event.timestamp_ms);
    let record = CrashRecord {
        id: id.clone(),
        schema_version: 1,
        service: service_name,
        timestamp_ms: event.timestamp_ms,
        trigger,
        exit_code,
        worktree: event.worktree.clone(),
        stack,
        trace_id: preferred_trace_id,
        entries,
        histogram,
    };

    persist(inner, &record).await?;
    inner.records.write().push(record);
    sweep(inner);
    Ok(())
}

async fn persist<C: Clock>(inner: &Arc<Inner<C>>, record: &CrashRecord) -> Result<(), CrashError> {
    let reports_dir = inner.config.read().reports_dir.clone();
    tokio::fs::create_dir_all(&reports_dir).await?;
    let path = reports_dir.join(format!("{}.json", record.id));
    let json = serde_json::to_vec_pretty(record)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

fn sweep<C: Clock>(inner: &Arc<Inner<C>>) {
    let config = inner.config.read().clone();
    let now = inner.clock.epoch_ms();
    let max_age_ms = config.max_age.as_millis() as u64;
    let mut records = inner.records.write();
    records.retain(|r| now.saturating_sub(r.timestamp_ms) <= max_age_ms);
    records.sort_by_key(|r| r.timestamp_ms);
    if records.len() > config.max_count {
        let excess = records.len() - config.max_count;
        records.drain(0..excess);
    }
}

#[cfg(test)]
#[path = "recorder_tests.rs"]
mod tests;
