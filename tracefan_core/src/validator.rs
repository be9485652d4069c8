use crate::diagnostics::{DiagnosticsSink, ENGINE_SOURCE, Severity};
use crate::job::InvalidReason;
use std::fs;
use std::path::Path;

const ERROR_TAG: &str = "[E]";
const WARNING_TAG: &str = "[W]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid(InvalidReason),
}

/// Decides from the engine log whether an artifact is a single, complete trace.
#[derive(Debug, Clone)]
pub struct TraceValidator {
    completion_marker: String,
}

impl TraceValidator {
    pub fn new(completion_marker: impl Into<String>) -> Self {
        Self {
            completion_marker: completion_marker.into(),
        }
    }

    /// Validates `artifact` against the evidence in `log`.
    ///
    /// Exactly one completion marker and a non-empty artifact make a valid
    /// trace. Every other verdict deletes the artifact. `[E]`/`[W]` lines of
    /// the log are relayed to `sink` whatever the verdict.
    pub fn validate(&self, log: &Path, artifact: &Path, sink: &dyn DiagnosticsSink) -> Verdict {
        sink.debug(&format!("Checking logfile at {log:?} for completeness"));
        let data = match fs::read(log) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                sink.warn(&format!("Cannot read trace log {log:?}: {e}"));
                discard(artifact, "log-less", sink);
                return Verdict::Invalid(InvalidReason::LogMissing);
            }
        };

        relay_tagged_lines(&data, sink);

        let count = data.matches(self.completion_marker.as_str()).count();
        if count < 1 {
            sink.warn(&format!("Incomplete trace: {artifact:?}"));
            discard(artifact, "incomplete", sink);
            return Verdict::Invalid(InvalidReason::Incomplete);
        }
        if count > 1 {
            sink.warn(&format!(
                "Multiple traces ({count}x) in one file {artifact:?}"
            ));
            discard(artifact, "multiple-trace containing", sink);
            return Verdict::Invalid(InvalidReason::MultipleTraces(count));
        }

        match fs::metadata(artifact) {
            Ok(meta) if meta.len() == 0 => {
                sink.warn(&format!("File has size 0 => {artifact:?} is empty"));
                discard(artifact, "empty", sink);
                Verdict::Invalid(InvalidReason::Empty)
            }
            Ok(_) => Verdict::Valid,
            Err(_) => {
                sink.warn(&format!(
                    "Log reports a completed trace but {artifact:?} does not exist"
                ));
                Verdict::Invalid(InvalidReason::ArtifactMissing)
            }
        }
    }
}

/// Forwards engine `[E]` and `[W]` lines at matching severity, text after the tag only.
pub fn relay_tagged_lines(data: &str, sink: &dyn DiagnosticsSink) {
    for line in data.lines() {
        if let Some((_, msg)) = line.split_once(ERROR_TAG) {
            sink.emit(Severity::Error, ENGINE_SOURCE, msg);
        } else if let Some((_, msg)) = line.split_once(WARNING_TAG) {
            sink.emit(Severity::Warning, ENGINE_SOURCE, msg);
        }
    }
}

fn discard(artifact: &Path, what: &str, sink: &dyn DiagnosticsSink) {
    match fs::remove_file(artifact) {
        Ok(()) => sink.info(&format!("Deleted {what} {artifact:?}")),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => sink.error(&format!("Failed to delete {what} {artifact:?}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_completion_marker;
    use crate::diagnostics::MemorySink;
    use std::path::PathBuf;

    struct Fixture {
        _dir: tempfile::TempDir,
        log: PathBuf,
        artifact: PathBuf,
    }

    fn fixture(log: Option<&str>, artifact: Option<&[u8]>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("a_trace.log");
        let artifact_path = dir.path().join("a_trace");
        if let Some(text) = log {
            fs::write(&log_path, text).unwrap();
        }
        if let Some(bytes) = artifact {
            fs::write(&artifact_path, bytes).unwrap();
        }
        Fixture {
            _dir: dir,
            log: log_path,
            artifact: artifact_path,
        }
    }

    fn validator() -> TraceValidator {
        TraceValidator::new(default_completion_marker())
    }

    #[test]
    fn marker_count_decides_validity() {
        for (markers, expected) in [
            (0, Verdict::Invalid(InvalidReason::Incomplete)),
            (1, Verdict::Valid),
            (2, Verdict::Invalid(InvalidReason::MultipleTraces(2))),
            (5, Verdict::Invalid(InvalidReason::MultipleTraces(5))),
        ] {
            let log = "[=] Completed trace\n".repeat(markers);
            let fx = fixture(Some(&log), Some(b"0123456789"));
            let sink = MemorySink::new();
            assert_eq!(validator().validate(&fx.log, &fx.artifact, &sink), expected);
            assert_eq!(fx.artifact.exists(), expected == Verdict::Valid);
        }
    }

    #[test]
    fn multiple_traces_warning_names_the_count() {
        let fx = fixture(
            Some("[=] Completed trace\n[=] Completed trace\n"),
            Some(b"x"),
        );
        let sink = MemorySink::new();
        validator().validate(&fx.log, &fx.artifact, &sink);
        assert!(sink.contains(Severity::Warning, "Multiple traces (2x)"));
        assert!(sink.contains(Severity::Info, "Deleted multiple-trace containing"));
    }

    #[test]
    fn empty_artifact_is_discarded() {
        let fx = fixture(Some("[=] Completed trace\n"), Some(b""));
        let sink = MemorySink::new();
        assert_eq!(
            validator().validate(&fx.log, &fx.artifact, &sink),
            Verdict::Invalid(InvalidReason::Empty)
        );
        assert!(!fx.artifact.exists());
        assert!(sink.contains(Severity::Warning, "a_trace\" is empty"));
    }

    #[test]
    fn missing_log_is_invalid() {
        let fx = fixture(None, Some(b"trace"));
        let sink = MemorySink::new();
        assert_eq!(
            validator().validate(&fx.log, &fx.artifact, &sink),
            Verdict::Invalid(InvalidReason::LogMissing)
        );
        assert!(!fx.artifact.exists());
    }

    #[test]
    fn completed_log_without_artifact_is_invalid() {
        let fx = fixture(Some("[=] Completed trace\n"), None);
        let sink = MemorySink::new();
        assert_eq!(
            validator().validate(&fx.log, &fx.artifact, &sink),
            Verdict::Invalid(InvalidReason::ArtifactMissing)
        );
    }

    #[test]
    fn tagged_lines_are_relayed_regardless_of_verdict() {
        let log = "[I] starting\n[W] image not found: libfoo.so\n[E] bad syscall\n";
        let fx = fixture(Some(log), Some(b"x"));
        let sink = MemorySink::new();
        validator().validate(&fx.log, &fx.artifact, &sink);

        let relayed: Vec<_> = sink
            .records()
            .into_iter()
            .filter(|r| r.source == ENGINE_SOURCE)
            .collect();
        assert_eq!(relayed.len(), 2);
        assert_eq!(relayed[0].severity, Severity::Warning);
        assert_eq!(relayed[0].message, " image not found: libfoo.so");
        assert_eq!(relayed[1].severity, Severity::Error);
        assert_eq!(relayed[1].message, " bad syscall");
    }

    #[test]
    fn custom_marker_is_honoured() {
        let fx = fixture(Some("TRACE DONE\n[=] Completed trace\n"), Some(b"x"));
        let sink = MemorySink::new();
        assert_eq!(
            TraceValidator::new("TRACE DONE").validate(&fx.log, &fx.artifact, &sink),
            Verdict::Valid
        );
    }
}
