//! Client-side log retention

use std::collections::VecDeque;

/// Lines a log observer keeps
pub const LOG_HISTORY_LIMIT: usize = 100;

const CLOSED_MARKER: &str = "(log client closed)";

/// Most recent log lines, newest first
#[derive(Debug, Clone)]
pub struct LogHistory {
    lines: VecDeque<String>,
    limit: usize,
}

impl Default for LogHistory {
    fn default() -> Self {
        Self::with_limit(LOG_HISTORY_LIMIT)
    }
}

impl LogHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(limit),
            limit,
        }
    }

    /// Record a line, evicting the oldest past the limit
    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_front(line.into());
        self.lines.truncate(self.limit);
    }

    /// Record the end of the session
    pub fn closed(&mut self, reason: Option<&str>) {
        match reason {
            Some(reason) => self.push(format!("{CLOSED_MARKER} {reason}")),
            None => self.push(CLOSED_MARKER),
        }
    }

    /// Lines newest first
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
