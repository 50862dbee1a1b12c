// SPDX-License-Identifier: MIT

//! Output parser capability set.
//!
//! Re-expresses the source system's interface-based polymorphism as a
//! tagged-variant enum: every parser kind is known up front (service and
//! workflow descriptors select one by name), so a closed `match` replaces a
//! dynamic dispatch table.

use serde::{Deserialize, Serialize};

/// One parsed log/output line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedLine {
    pub level: Option<String>,
    pub source: Option<String>,
    pub message: String,
    /// Additional structured fields extracted by the parser (e.g. a
    /// request/trace id field).
    #[serde(default)]
    pub fields: std::collections::HashMap<String, String>,
}

impl ParsedLine {
    fn plain(message: impl Into<String>) -> Self {
        Self {
            level: None,
            source: None,
            message: message.into(),
            fields: std::collections::HashMap::new(),
        }
    }
}

/// Configured parser kind for a service's or workflow's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputParser {
    /// No parsing; log lines are passed through unchanged.
    NoOp,
    /// Generic `level: message` / `key=value` line parser.
    Generic,
    /// `go build`/`go vet` style `file:line: message` diagnostics.
    GoCompiler,
    /// `go test -json` structured test events, one JSON object per line.
    GoTestJson,
    /// HTML-escaping passthrough for terminal-rendered viewers.
    Html,
}

impl Default for OutputParser {
    fn default() -> Self {
        OutputParser::NoOp
    }
}

impl OutputParser {
    /// Parse a chunk of raw output into structured lines. Never panics on
    /// malformed input: unparseable lines degrade to a plain message.
    pub fn parse(&self, text: &str) -> Vec<ParsedLine> {
        match self {
            OutputParser::NoOp => Vec::new(),
            OutputParser::Generic => text.lines().map(Self::parse_generic_line).collect(),
            OutputParser::GoCompiler => text.lines().map(Self::parse_go_compiler_line).collect(),
            OutputParser::GoTestJson => text
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(Self::parse_go_test_json_line)
                .collect(),
            OutputParser::Html => text.lines().map(|l| ParsedLine::plain(html_escape(l))).collect(),
        }
    }

    fn parse_generic_line(line: &str) -> ParsedLine {
        if let Some((level, rest)) = line.split_once(": ") {
            let level = level.trim();
            if level.chars().all(|c| c.is_ascii_alphabetic()) && !level.is_empty() {
                return ParsedLine {
                    level: Some(level.to_ascii_lowercase()),
                    source: None,
                    message: rest.to_string(),
                    fields: std::collections::HashMap::new(),
                };
            }
        }
        ParsedLine::plain(line)
    }

    fn parse_go_compiler_line(line: &str) -> ParsedLine {
        let mut parts = line.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(file), Some(lineno), Some(message)) if lineno.trim().parse::<u64>().is_ok() => {
                let mut fields = std::collections::HashMap::new();
                fields.insert("file".to_string(), file.to_string());
                fields.insert("line".to_string(), lineno.trim().to_string());
                ParsedLine {
                    level: Some("error".to_string()),
                    source: Some(file.to_string()),
                    message: message.trim().to_string(),
                    fields,
                }
            }
            _ => ParsedLine::plain(line),
        }
    }

    fn parse_go_test_json_line(line: &str) -> ParsedLine {
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) => {
                let action = value.get("Action").and_then(|v| v.as_str()).unwrap_or("");
                let test = value.get("Test").and_then(|v| v.as_str());
                let message = value
                    .get("Output")
                    .and_then(|v| v.as_str())
                    .unwrap_or(action)
                    .to_string();
                let mut fields = std::collections::HashMap::new();
                if let Some(test) = test {
                    fields.insert("test".to_string(), test.to_string());
                }
                fields.insert("action".to_string(), action.to_string());
                ParsedLine {
                    level: None,
                    source: test.map(|t| t.to_string()),
                    message,
                    fields,
                }
            }
            Err(_) => ParsedLine::plain(line),
        }
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Aggregate pass/fail/skip counts extracted from `go_test_json` output,
/// attached to `workflow.finished` per §4.4.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl TestCounts {
    pub fn from_parsed_lines(lines: &[ParsedLine]) -> Self {
        let mut counts = TestCounts::default();
        for line in lines {
            match line.fields.get("action").map(String::as_str) {
                Some("pass") if line.fields.contains_key("test") => counts.passed += 1,
                Some("fail") if line.fields.contains_key("test") => counts.failed += 1,
                Some("skip") if line.fields.contains_key("test") => counts.skipped += 1,
                _ => {}
            }
        }
        counts
    }
}

#[cfg(test)]
#[path = "output_parser_tests.rs"]
mod tests;
