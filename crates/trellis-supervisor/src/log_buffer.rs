// SPDX-License-Identifier: MIT

//! Bounded in-memory ring of raw and parsed log lines for one service.

use std::collections::VecDeque;
use trellis_core::output_parser::ParsedLine;

/// Ring buffer of (timestamp_ms, raw line) tuples, capped by total bytes,
/// plus a parallel ring of parsed entries when a parser is configured.
/// Oldest entries are dropped on overflow.
pub struct LogBuffer {
    max_bytes: usize,
    max_parsed_lines: usize,
    raw: VecDeque<(u64, String)>,
    raw_bytes: usize,
    parsed: VecDeque<(u64, ParsedLine)>,
}

impl LogBuffer {
    pub fn new(max_bytes: usize, max_parsed_lines: usize) -> Self {
        Self {
            max_bytes,
            max_parsed_lines,
            raw: VecDeque::new(),
            raw_bytes: 0,
            parsed: VecDeque::new(),
        }
    }

    pub fn append_raw(&mut self, timestamp_ms: u64, line: String) {
        self.raw_bytes += line.len();
        self.raw.push_back((timestamp_ms, line));
        while self.raw_bytes > self.max_bytes {
            match self.raw.pop_front() {
                Some((_, dropped)) => self.raw_bytes -= dropped.len(),
                None => break,
            }
        }
    }

    pub fn append_parsed(&mut self, timestamp_ms: u64, lines: impl IntoIterator<Item = ParsedLine>) {
        for line in lines {
            self.parsed.push_back((timestamp_ms, line));
        }
        while self.parsed.len() > self.max_parsed_lines {
            self.parsed.pop_front();
        }
    }

    /// Newest `n` raw lines, oldest first.
    pub fn newest_raw(&self, n: usize) -> Vec<String> {
        self.raw
            .iter()
            .rev()
            .take(n)
            .map(|(_, line)| line.clone())
            .rev()
            .collect()
    }

    /// Newest `n` parsed entries, oldest first.
    pub fn newest_parsed(&self, n: usize) -> Vec<ParsedLine> {
        self.parsed
            .iter()
            .rev()
            .take(n)
            .map(|(_, line)| line.clone())
            .rev()
            .collect()
    }

    /// Newest `n` parsed entries with their capture timestamp, oldest first.
    pub fn newest_parsed_with_timestamps(&self, n: usize) -> Vec<(u64, ParsedLine)> {
        self.parsed.iter().rev().take(n).cloned().rev().collect()
    }

    pub fn size_bytes(&self) -> usize {
        self.raw_bytes
    }

    pub fn clear(&mut self) {
        self.raw.clear();
        self.raw_bytes = 0;
        self.parsed.clear();
    }
}

#[cfg(test)]
#[path = "log_buffer_tests.rs"]
mod tests;
