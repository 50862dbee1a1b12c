// SPDX-License-Identifier: MIT

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use trellis_core::id::ServiceName;

/// Tuning for the crash recorder: where reports land, how long they're
/// retained, and which parsed-log field carries a request/trace id.
#[derive(Debug, Clone)]
pub struct CrashConfig {
    pub reports_dir: PathBuf,
    pub max_age: Duration,
    pub max_count: usize,
    pub default_id_field: String,
    pub id_field_overrides: HashMap<ServiceName, String>,
    pub stack_field: Option<String>,
}

impl CrashConfig {
    pub fn id_field_for(&self, service: &ServiceName) -> &str {
        self.id_field_overrides
            .get(service)
            .map(String::as_str)
            .unwrap_or(&self.default_id_field)
    }
}

impl Default for CrashConfig {
    fn default() -> Self {
        Self {
            reports_dir: PathBuf::from("crash-reports"),
            max_age: Duration::from_secs(30 * 24 * 3600),
            max_count: 200,
            default_id_field: "trace_id".to_string(),
            id_field_overrides: HashMap::new(),
            stack_field: Some("stack".to_string()),
        }
    }
}
