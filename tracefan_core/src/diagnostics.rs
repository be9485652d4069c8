use std::fmt;
use std::sync::Mutex;

/// Message source for everything the orchestrator itself reports.
pub const ORCHESTRATOR_SOURCE: &str = "tracefan";
/// Message source for lines relayed out of an engine log file.
pub const ENGINE_SOURCE: &str = "tracer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// A `DiagnosticsSink` receives every message the orchestrator and its workers
/// produce.
///
/// Components never log through a process-wide logger; they are handed a sink.
/// Workers share one sink across threads, hence the `Send + Sync` bound.
pub trait DiagnosticsSink: Send + Sync {
    /// Records one message at the given severity.
    ///
    /// # Arguments
    /// * `severity`: How loud the message is.
    /// * `source`: Who produced it ([`ORCHESTRATOR_SOURCE`] or [`ENGINE_SOURCE`]).
    /// * `message`: The text itself, without a trailing newline.
    fn emit(&self, severity: Severity, source: &str, message: &str);

    fn debug(&self, message: &str) {
        self.emit(Severity::Debug, ORCHESTRATOR_SOURCE, message);
    }

    fn info(&self, message: &str) {
        self.emit(Severity::Info, ORCHESTRATOR_SOURCE, message);
    }

    fn warn(&self, message: &str) {
        self.emit(Severity::Warning, ORCHESTRATOR_SOURCE, message);
    }

    fn error(&self, message: &str) {
        self.emit(Severity::Error, ORCHESTRATOR_SOURCE, message);
    }

    fn critical(&self, message: &str) {
        self.emit(Severity::Critical, ORCHESTRATOR_SOURCE, message);
    }
}

/// Forwards every message to the `tracing` macros.
///
/// `Critical` has no `tracing` level of its own; it is emitted at `ERROR` with
/// `critical = true` attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        TracingSink
    }
}

impl DiagnosticsSink for TracingSink {
    fn emit(&self, severity: Severity, source: &str, message: &str) {
        match severity {
            Severity::Debug => tracing::debug!(source, "{message}"),
            Severity::Info => tracing::info!(source, "{message}"),
            Severity::Warning => tracing::warn!(source, "{message}"),
            Severity::Error => tracing::error!(source, "{message}"),
            Severity::Critical => tracing::error!(source, critical = true, "{message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub severity: Severity,
    pub source: String,
    pub message: String,
}

/// Keeps every message in memory. Used by tests to assert on what was reported.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        match self.records.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Returns `true` if any record at `severity` contains `needle`.
    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.records()
            .iter()
            .any(|r| r.severity == severity && r.message.contains(needle))
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.records()
            .iter()
            .filter(|r| r.severity == severity)
            .count()
    }
}

impl DiagnosticsSink for MemorySink {
    fn emit(&self, severity: Severity, source: &str, message: &str) {
        let record = Record {
            severity,
            source: source.to_string(),
            message: message.to_string(),
        };
        match self.records.lock() {
            Ok(mut guard) => guard.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_records_severity_and_source() {
        let sink = MemorySink::new();
        sink.warn("Incomplete trace: /tmp/tm/crashes/a_trace");
        sink.emit(Severity::Error, ENGINE_SOURCE, " bad opcode");

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].source, ORCHESTRATOR_SOURCE);
        assert_eq!(records[1].source, ENGINE_SOURCE);
        assert!(sink.contains(Severity::Warning, "Incomplete trace"));
        assert!(!sink.contains(Severity::Error, "Incomplete trace"));
        assert_eq!(sink.count(Severity::Error), 1);
    }

    #[test]
    fn memory_sink_is_shareable_across_threads() {
        let sink = MemorySink::new();
        std::thread::scope(|s| {
            for i in 0..4 {
                let sink = &sink;
                s.spawn(move || sink.info(&format!("worker {i}")));
            }
        });
        assert_eq!(sink.count(Severity::Info), 4);
    }

    #[test]
    fn severities_order_from_quiet_to_loud() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Warning < Severity::Error);
        assert!(Severity::Error < Severity::Critical);
        assert_eq!(Severity::Critical.to_string(), "CRITICAL");
    }
}
