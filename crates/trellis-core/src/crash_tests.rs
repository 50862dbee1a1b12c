use super::*;
use crate::output_parser::ParsedLine;
use std::collections::HashMap;

fn entry(service: &str, level: Option<&str>) -> CrashLogEntry {
    CrashLogEntry {
        service: ServiceName::new(service),
        timestamp_ms: 0,
        line: ParsedLine {
            level: level.map(|s| s.to_string()),
            source: None,
            message: "boom".to_string(),
            fields: HashMap::new(),
        },
    }
}

#[test]
fn format_id_matches_expected_layout() {
    // 2024-01-02T03:04:05.678Z
    let epoch_ms = 1_704_164_645_678;
    let id = CrashRecord::format_id(epoch_ms);
    assert_eq!(id.as_str(), "20240102-030405.678");
}

#[test]
fn histogram_counts_by_source_and_level() {
    let entries = vec![
        entry("api", Some("error")),
        entry("api", Some("warn")),
        entry("worker", Some("error")),
        entry("worker", None),
    ];
    let histogram = CrashHistogram::from_entries(&entries);
    assert_eq!(histogram.by_source.get("api"), Some(&2));
    assert_eq!(histogram.by_source.get("worker"), Some(&2));
    assert_eq!(histogram.by_level.get("error"), Some(&2));
    assert_eq!(histogram.by_level.get("warn"), Some(&1));
}
