//! Reporter: human-readable progress sink.
//!
//! Reporters only observe a build. Nothing a reporter does can change the
//! outcome of a step.

use owo_colors::OwoColorize;
use parking_lot::Mutex;
use std::io::Write;

/// Severity of a reported line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportLevel {
    Say,
    Message,
    Error,
}

/// A sink for progress and error lines.
pub trait Reporter: Send + Sync {
    /// A top-level progress line.
    fn say(&self, message: &str);

    /// A detail line under the current progress line.
    fn message(&self, message: &str);

    /// An error line.
    fn error(&self, message: &str);
}

/// Writes packer-style lines to stdout/stderr.
pub struct ConsoleReporter {
    prefix: String,
    color: bool,
}

impl ConsoleReporter {
    pub fn new(prefix: impl Into<String>, color: bool) -> Self {
        Self {
            prefix: prefix.into(),
            color,
        }
    }
}

impl Reporter for ConsoleReporter {
    fn say(&self, message: &str) {
        let line = format!("==> {}: {}", self.prefix, message);
        let mut out = std::io::stdout().lock();
        if self.color {
            let _ = writeln!(out, "{}", line.bold().green());
        } else {
            let _ = writeln!(out, "{}", line);
        }
    }

    fn message(&self, message: &str) {
        let _ = writeln!(std::io::stdout().lock(), "    {}: {}", self.prefix, message);
    }

    fn error(&self, message: &str) {
        let line = format!("==> {}: {}", self.prefix, message);
        let mut err = std::io::stderr().lock();
        if self.color {
            let _ = writeln!(err, "{}", line.bold().red());
        } else {
            let _ = writeln!(err, "{}", line);
        }
    }
}

/// A single recorded report line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub level: ReportLevel,
    pub text: String,
}

/// Keeps every line in memory. Used when embedding the builder and in tests.
#[derive(Default)]
pub struct RecordingReporter {
    lines: Mutex<Vec<Report>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<Report> {
        self.lines.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.lines_at(ReportLevel::Error)
    }

    pub fn says(&self) -> Vec<String> {
        self.lines_at(ReportLevel::Say)
    }

    /// True if any line of any level contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|r| r.text.contains(needle))
    }

    fn lines_at(&self, level: ReportLevel) -> Vec<String> {
        self.lines
            .lock()
            .iter()
            .filter(|r| r.level == level)
            .map(|r| r.text.clone())
            .collect()
    }

    fn push(&self, level: ReportLevel, text: &str) {
        self.lines.lock().push(Report {
            level,
            text: text.to_string(),
        });
    }
}

impl Reporter for RecordingReporter {
    fn say(&self, message: &str) {
        self.push(ReportLevel::Say, message);
    }

    fn message(&self, message: &str) {
        self.push(ReportLevel::Message, message);
    }

    fn error(&self, message: &str) {
        self.push(ReportLevel::Error, message);
    }
}
