// SPDX-License-Identifier: MIT

//! Event type and the bus's pattern grammar.

use crate::id::EventId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

fn default_schema_version() -> u32 {
    1
}

/// Immutable record published on the bus. Never mutated after publication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Dotted type string, e.g. `service.crashed`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Monotonic milliseconds since epoch, assigned on publish if zero.
    pub timestamp_ms: u64,
    pub worktree: String,
    #[serde(default)]
    pub payload: HashMap<String, Value>,
}

impl Event {
    /// Construct an event with an empty id/timestamp/worktree, to be filled
    /// in by the bus at publish time.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            id: EventId::new(""),
            schema_version: default_schema_version(),
            event_type: event_type.into(),
            timestamp_ms: 0,
            worktree: String::new(),
            payload: HashMap::new(),
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// A compiled subscription pattern. Compiled once at `Subscribe` time so
/// matching never backtracks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    /// `*` — matches any non-empty event type.
    Any,
    /// `prefix.*` — matches types beginning with `prefix.`.
    Prefix(String),
    /// `*.suffix` — matches types ending with `.suffix`.
    Suffix(String),
    /// Exact string match.
    Exact(String),
}

impl Pattern {
    /// Compile a pattern string. An empty pattern compiles to a pattern that
    /// matches nothing.
    pub fn compile(raw: &str) -> Pattern {
        if raw.is_empty() {
            return Pattern::Exact(String::new());
        }
        if raw == "*" {
            return Pattern::Any;
        }
        if let Some(prefix) = raw.strip_suffix(".*") {
            return Pattern::Prefix(format!("{prefix}."));
        }
        if let Some(suffix) = raw.strip_prefix("*.") {
            return Pattern::Suffix(format!(".{suffix}"));
        }
        Pattern::Exact(raw.to_string())
    }

    /// Match against an event type. An empty event type never matches.
    pub fn matches(&self, event_type: &str) -> bool {
        if event_type.is_empty() {
            return false;
        }
        match self {
            Pattern::Any => true,
            Pattern::Prefix(p) => event_type.starts_with(p.as_str()),
            Pattern::Suffix(s) => event_type.ends_with(s.as_str()),
            Pattern::Exact(e) => {
                if e.is_empty() {
                    false
                } else {
                    event_type == e
                }
            }
        }
    }
}

/// History query filter. Patterns are OR-ed; all other fields are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub type_patterns: Vec<Pattern>,
    pub worktree: Option<String>,
    pub since_ms: Option<u64>,
    pub until_ms: Option<u64>,
    /// Keeps the newest matches up to this count.
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn matches(&self, event: &Event) -> bool {
        if !self.type_patterns.is_empty()
            && !self
                .type_patterns
                .iter()
                .any(|p| p.matches(&event.event_type))
        {
            return false;
        }
        if let Some(wt) = &self.worktree {
            if &event.worktree != wt {
                return false;
            }
        }
        if let Some(since) = self.since_ms {
            if event.timestamp_ms < since {
                return false;
            }
        }
        if let Some(until) = self.until_ms {
            if event.timestamp_ms > until {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
