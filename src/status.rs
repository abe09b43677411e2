//! Where session progress is reported.

use std::sync::Mutex;

use crate::io::{Io, IoKind};

/// Anything that can render a one-line status, typically a pending program.
pub trait HasStatus {
    fn status(&self) -> String;
}

impl HasStatus for String {
    fn status(&self) -> String {
        self.clone()
    }
}

/// Reporting side channel. Nothing reported here feeds back into control flow.
pub trait StatusSink: Send + Sync {
    /// Report a line of output together with the still pending programs.
    fn status(&self, io: &Io, pending: &[&dyn HasStatus]);

    /// Report a free-form line (feedback, warnings).
    fn log_line(&self, line: &str);
}

/// Render pending programs as `◀◀ first ◀ second`, or `◼` when none are left.
pub fn render_pending(pending: &[&dyn HasStatus]) -> String {
    if pending.is_empty() {
        return "◼".to_string();
    }
    let items = pending.iter().map(|p| p.status()).collect::<Vec<_>>();
    format!("◀◀ {}", items.join(" ◀ "))
}

/// Prints to stderr, the way the rest of the tooling reports progress.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    /// Also print raw guest output lines.
    pub verbose: bool,
}

impl ConsoleSink {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl StatusSink for ConsoleSink {
    fn status(&self, io: &Io, pending: &[&dyn HasStatus]) {
        if io.is_blank() {
            return;
        }
        if self.verbose || io.kind() != IoKind::Out {
            eprintln!("  {:<72}  {}", io.unformatted(), render_pending(pending));
        }
    }

    fn log_line(&self, line: &str) {
        eprintln!("{}", line);
    }
}

/// Keeps everything in memory. Useful for embedding and for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    statuses: Mutex<Vec<(String, String)>>,
    lines: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(output, rendered pending programs)` pairs in report order.
    pub fn statuses(&self) -> Vec<(String, String)> {
        self.statuses.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

impl StatusSink for RecordingSink {
    fn status(&self, io: &Io, pending: &[&dyn HasStatus]) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.push((io.unformatted().to_string(), render_pending(pending)));
        }
    }

    fn log_line(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}
