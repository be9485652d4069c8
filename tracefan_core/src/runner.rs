use crate::diagnostics::DiagnosticsSink;
use crate::executor::{CommandExecutor, ExecutionStatus, ProcessSpec, StdinSource};
use crate::job::{InvalidReason, Job, JobOutcome, JobPaths, JobReport};
use crate::packager;
use crate::target::{InputDelivery, TargetSpec};
use crate::validator::{TraceValidator, Verdict};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Always exported to the engine: leak reports at exit would otherwise turn
/// every sanitizer-built target into a non-zero exit.
pub const LEAK_DETECTION_ENV: (&str, &str) = ("ASAN_OPTIONS", "detect_leaks=0");

/// How to launch the instrumentation engine.
#[derive(Debug, Clone)]
pub struct EngineSpec {
    pub command: Vec<String>,
    pub tool: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl EngineSpec {
    /// `<engine> -t <tool> -o <artifact> -logfile <log> -- <target argv>`
    pub fn process_for(&self, paths: &JobPaths, target: &TargetSpec, input: &Path) -> ProcessSpec {
        let invocation = target.invocation_for(input);
        let mut argv = self.command.clone();
        if let Some(tool) = &self.tool {
            argv.push("-t".to_string());
            argv.push(tool.to_string_lossy().into_owned());
        }
        argv.extend([
            "-o".to_string(),
            paths.artifact.to_string_lossy().into_owned(),
            "-logfile".to_string(),
            paths.log.to_string_lossy().into_owned(),
            "--".to_string(),
        ]);
        argv.extend(invocation.argv);

        let mut env = vec![(
            LEAK_DETECTION_ENV.0.to_string(),
            LEAK_DETECTION_ENV.1.to_string(),
        )];
        env.extend(
            self.env
                .iter()
                .filter(|(k, _)| k != LEAK_DETECTION_ENV.0)
                .cloned(),
        );

        let stdin = match invocation.delivery {
            InputDelivery::StdIn(path) => StdinSource::File(path),
            InputDelivery::Argument => StdinSource::Null,
        };
        ProcessSpec { argv, env, stdin }
    }
}

/// Executes one job end to end: engine run, validation, optional packaging.
///
/// Holds only immutable configuration, so a single runner is shared by every
/// worker.
#[derive(Debug, Clone)]
pub struct JobRunner {
    pub engine: EngineSpec,
    pub target: TargetSpec,
    pub executor: CommandExecutor,
    pub validator: TraceValidator,
    pub input_root: PathBuf,
    pub scratch_root: PathBuf,
    pub package: bool,
    /// Filenames in the corpus that are not inputs.
    pub skip_files: BTreeSet<String>,
}

impl JobRunner {
    /// Runs `job`, or returns `None` for reserved non-input files.
    pub fn run(&self, job: &Job, sink: &dyn DiagnosticsSink) -> Option<JobReport> {
        if job
            .filename
            .to_str()
            .is_some_and(|name| self.skip_files.contains(name))
        {
            sink.debug(&format!("Skipping non-input file {job}"));
            return None;
        }

        let started = Instant::now();
        let input = job.input_path(&self.input_root);
        let paths = job.paths(&self.scratch_root);
        let spec = self.engine.process_for(&paths, &self.target, &input);
        sink.debug(&format!("CMD: {:?} (stdin: {:?})", spec.argv, spec.stdin));

        let exit_code = match self.executor.execute(&spec) {
            ExecutionStatus::Ok => Some(0),
            ExecutionStatus::Failed { code, description } => {
                // Targets under trace crash on purpose; the log decides.
                sink.debug(&format!("Process errored out for {job}: {description}"));
                code
            }
            ExecutionStatus::Timeout => {
                sink.info(&format!(
                    "Timeout for {input:?} after {:?}",
                    self.executor.timeout()
                ));
                discard_partial(&paths.artifact, sink);
                return Some(self.report(job, JobOutcome::TimedOut, None, None, started));
            }
            ExecutionStatus::Other(msg) => {
                sink.error(&format!("Engine failed for {job}: {msg}"));
                discard_partial(&paths.artifact, sink);
                return Some(self.report(job, JobOutcome::ProcessError(msg), None, None, started));
            }
        };

        let outcome = match self.validator.validate(&paths.log, &paths.artifact, sink) {
            Verdict::Invalid(reason) => JobOutcome::Invalid(reason),
            Verdict::Valid if !self.package => {
                return Some(self.report(
                    job,
                    JobOutcome::Valid,
                    exit_code,
                    Some(paths.artifact),
                    started,
                ));
            }
            Verdict::Valid => match packager::package(&paths.artifact) {
                Ok(archive) => {
                    sink.debug(&format!("Zipped {:?} into {archive:?}", paths.artifact));
                    return Some(self.report(
                        job,
                        JobOutcome::Valid,
                        exit_code,
                        Some(archive),
                        started,
                    ));
                }
                Err(e) => {
                    sink.error(&format!("Failed to package {:?}: {e}", paths.artifact));
                    discard_partial(&paths.artifact, sink);
                    JobOutcome::Invalid(InvalidReason::PackagingFailed(e.to_string()))
                }
            },
        };
        Some(self.report(job, outcome, exit_code, None, started))
    }

    fn report(
        &self,
        job: &Job,
        outcome: JobOutcome,
        exit_code: Option<i32>,
        artifact: Option<PathBuf>,
        started: Instant,
    ) -> JobReport {
        JobReport {
            job: job.clone(),
            outcome,
            exit_code,
            artifact,
            elapsed: started.elapsed(),
        }
    }
}

fn discard_partial(artifact: &Path, sink: &dyn DiagnosticsSink) {
    if artifact.exists() {
        match std::fs::remove_file(artifact) {
            Ok(()) => sink.info(&format!("Deleted unfinished {artifact:?}")),
            Err(e) => sink.error(&format!("Failed to delete unfinished {artifact:?}: {e}")),
        }
    }
}
