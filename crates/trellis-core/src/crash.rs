// SPDX-License-Identifier: MIT

//! Crash record data model.

use crate::id::{CrashId, ServiceName};
use crate::output_parser::ParsedLine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_schema_version() -> u32 {
    1
}

/// One log entry carried in a crash record, correlated by trace id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashLogEntry {
    pub service: ServiceName,
    pub timestamp_ms: u64,
    pub line: ParsedLine,
}

/// Count of log entries by (service, level).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrashHistogram {
    pub by_source: HashMap<String, u32>,
    pub by_level: HashMap<String, u32>,
}

impl CrashHistogram {
    pub fn from_entries(entries: &[CrashLogEntry]) -> Self {
        let mut histogram = CrashHistogram::default();
        for entry in entries {
            *histogram
                .by_source
                .entry(entry.service.as_str().to_string())
                .or_insert(0) += 1;
            if let Some(level) = &entry.line.level {
                *histogram.by_level.entry(level.clone()).or_insert(0) += 1;
            }
        }
        histogram
    }
}

/// A saved crash report, produced on `service.crashed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashRecord {
    pub id: CrashId,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub service: ServiceName,
    pub timestamp_ms: u64,
    pub trigger: String,
    pub exit_code: Option<i32>,
    pub worktree: String,
    pub stack: Option<String>,
    pub trace_id: Option<String>,
    pub entries: Vec<CrashLogEntry>,
    pub histogram: CrashHistogram,
}

impl CrashRecord {
    /// Format a stable id from an epoch-millisecond timestamp, per
    /// `YYYYMMDD-HHMMSS.mmm`.
    pub fn format_id(epoch_ms: u64) -> CrashId {
        let secs = (epoch_ms / 1000) as i64;
        let millis = epoch_ms % 1000;
        let datetime = chrono::DateTime::from_timestamp(secs, 0).unwrap_or_default();
        CrashId::new(format!(
            "{}.{millis:03}",
            datetime.format("%Y%m%d-%H%M%S")
        ))
    }
}

#[cfg(test)]
#[path = "crash_tests.rs"]
mod tests;
