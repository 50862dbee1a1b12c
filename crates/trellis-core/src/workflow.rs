// SPDX-License-Identifier: MIT

//! Workflow descriptor and run-state data model.

use crate::error::FieldError;
use crate::id::{RunId, ServiceName, WorkflowId};
use crate::output_parser::{OutputParser, ParsedLine, TestCounts};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Type of one named workflow input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    Text,
    Select,
    Checkbox,
    Datepicker,
}

/// Schema for one named workflow input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    pub input_type: InputType,
    #[serde(default)]
    pub allowed_values: Vec<String>,
    pub pattern: Option<String>,
    #[serde(default)]
    pub required: bool,
    pub default: Option<String>,
}

impl InputSpec {
    /// Validate a single provided value (or absence, falling back to
    /// `default`) against this spec. Returns `None` on success.
    pub fn validate(&self, provided: Option<&String>) -> Option<FieldError> {
        let value = provided.or(self.default.as_ref());
        let value = match value {
            Some(v) => v,
            None => {
                if self.required {
                    return Some(FieldError {
                        field: self.name.clone(),
                        message: "required".to_string(),
                    });
                }
                return None;
            }
        };

        if self.input_type == InputType::Select
            && !self.allowed_values.is_empty()
            && !self.allowed_values.iter().any(|a| a == value)
        {
            return Some(FieldError {
                field: self.name.clone(),
                message: format!("value {value:?} is not allowed"),
            });
        }

        if let Some(pattern) = &self.pattern {
            match regex::Regex::new(pattern) {
                Ok(re) if !re.is_match(value) => {
                    return Some(FieldError {
                        field: self.name.clone(),
                        message: format!("does not match pattern {pattern:?}"),
                    });
                }
                Err(_) => {
                    return Some(FieldError {
                        field: self.name.clone(),
                        message: "invalid pattern configured".to_string(),
                    });
                }
                _ => {}
            }
        }

        if self.input_type == InputType::Datepicker
            && chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d").is_err()
        {
            return Some(FieldError {
                field: self.name.clone(),
                message: "not a valid YYYY-MM-DD date".to_string(),
            });
        }

        if self.input_type == InputType::Checkbox && value != "true" && value != "false" {
            return Some(FieldError {
                field: self.name.clone(),
                message: "must be \"true\" or \"false\"".to_string(),
            });
        }

        None
    }
}

/// One step of a workflow, a plain argv command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub argv: Vec<String>,
}

/// Static configuration for one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDescriptor {
    pub id: WorkflowId,
    pub display_name: String,
    pub steps: Vec<WorkflowStep>,
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub parser: OutputParser,
    #[serde(default)]
    pub requires_stopped: Vec<ServiceName>,
    #[serde(default)]
    pub restart_watched_on_success: bool,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
}

impl WorkflowDescriptor {
    /// Validate a set of provided input values against every declared
    /// input. All-or-nothing: collects every failing field.
    pub fn validate_inputs(&self, provided: &HashMap<String, String>) -> Vec<FieldError> {
        self.inputs
            .iter()
            .filter_map(|spec| spec.validate(provided.get(&spec.name)))
            .collect()
    }
}

/// Lifecycle state of one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

/// Mutable state of one workflow invocation.
#[derive(Debug, Clone)]
pub struct RunState {
    pub run_id: RunId,
    pub descriptor: WorkflowDescriptor,
    pub status: RunStatus,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub exit_code: Option<i32>,
    /// Accumulated stdout+stderr, capped at 10 MiB.
    pub output: Vec<u8>,
    pub output_truncated: bool,
    pub parsed_lines: Vec<ParsedLine>,
    pub test_counts: Option<TestCounts>,
    pub error_message: Option<String>,
    pub completed: bool,
    pub expires_at: Option<Instant>,
    /// HTML-escaped rendering of `output`, refreshed at most every 100 ms
    /// by the runner so a terminal-style viewer can poll it cheaply.
    pub rendered_html: Option<String>,
}

impl RunState {
    pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;
    /// How long a completed run remains queryable after `expiresAt`.
    pub const RETENTION_AFTER_EXPIRY: Duration = Duration::from_secs(60);

    pub fn new(run_id: RunId, descriptor: WorkflowDescriptor) -> Self {
        Self {
            run_id,
            descriptor,
            status: RunStatus::Pending,
            started_at: None,
            finished_at: None,
            exit_code: None,
            output: Vec::new(),
            output_truncated: false,
            parsed_lines: Vec::new(),
            test_counts: None,
            error_message: None,
            completed: false,
            expires_at: None,
            rendered_html: None,
        }
    }

    /// Literal marker appended to `output` the moment the cap is hit, so a
    /// client reading the raw byte stream can tell it was cut off in-band.
    pub const TRUNCATION_MARKER: &'static [u8] = b"\n... [output truncated]\n";

    /// Append output, honoring the 10 MiB cap. On exceedance, the buffer is
    /// truncated to leave room for [`Self::TRUNCATION_MARKER`] so the
    /// buffer never grows past the cap and still ends with the marker.
    pub fn append_output(&mut self, chunk: &[u8]) {
        if self.output_truncated {
            return;
        }
        let budget = Self::MAX_OUTPUT_BYTES.saturating_sub(Self::TRUNCATION_MARKER.len());
        let remaining = budget.saturating_sub(self.output.len());
        if chunk.len() > remaining {
            self.output.extend_from_slice(&chunk[..remaining]);
            self.output.extend_from_slice(Self::TRUNCATION_MARKER);
            self.output_truncated = true;
        } else {
            self.output.extend_from_slice(chunk);
        }
    }

    pub fn mark_completed(&mut self, status: RunStatus, now: Instant) {
        debug_assert!(matches!(
            status,
            RunStatus::Success | RunStatus::Failed | RunStatus::Canceled
        ));
        self.status = status;
        self.completed = true;
        self.finished_at = Some(now);
        self.expires_at = Some(now + RunState::RETENTION_AFTER_EXPIRY);
    }
}

#[cfg(test)]
#[path = "workflow_tests.rs"]
mod tests;
