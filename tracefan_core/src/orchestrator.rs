use crate::config::TracefanConfig;
use crate::diagnostics::DiagnosticsSink;
use crate::executor::{CommandExecutor, CommandExecutorConfig};
use crate::job::Category;
use crate::preflight::{Preflight, PreflightError};
use crate::promotion::{Finalizer, PromotionError, RunSummary};
use crate::runner::{EngineSpec, JobRunner};
use crate::scheduler::{CancellationToken, FanOutScheduler, SchedulerError};
use crate::scratch::{RemovalPolicy, ScratchArea, ScratchError};
use crate::target::TargetSpec;
use crate::validator::TraceValidator;
use rand_core::RngCore;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Preflight(#[from] PreflightError),
    #[error(transparent)]
    Scratch(#[from] ScratchError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Promotion(#[from] PromotionError),
    #[error("Failed to create output directory {path:?}: {source}")]
    Output {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A validated, ready-to-run tracing campaign.
#[derive(Debug)]
pub struct Orchestrator {
    target: TargetSpec,
    engine: EngineSpec,
    categories: Vec<Category>,
    input_root: PathBuf,
    output_root: PathBuf,
    scratch_root: PathBuf,
    removal_policy: RemovalPolicy,
    aslr_control: PathBuf,
    executor: CommandExecutor,
    validator: TraceValidator,
    parallelism: usize,
    package: bool,
    promote_logs: bool,
    skip_files: Vec<String>,
    seed: Option<u64>,
}

impl Orchestrator {
    pub fn from_config(config: &TracefanConfig) -> Result<Self, OrchestratorError> {
        let target = TargetSpec::new(config.target.command.clone())
            .map_err(|e| OrchestratorError::Config(e.to_string()))?;
        if config.engine.command.is_empty() {
            return Err(OrchestratorError::Config(
                "engine command is not set (configure [engine] command or PIN_ROOT)".to_string(),
            ));
        }
        let categories = config
            .run
            .categories()
            .map_err(|e| OrchestratorError::Config(e.to_string()))?;
        if categories.is_empty() {
            return Err(OrchestratorError::Config("no categories configured".to_string()));
        }
        let input_root = config
            .run
            .input_dir
            .clone()
            .ok_or_else(|| OrchestratorError::Config("input directory is not set".to_string()))?;
        let output_root = config
            .run
            .output_dir
            .clone()
            .ok_or_else(|| OrchestratorError::Config("output directory is not set".to_string()))?;

        Ok(Self {
            target,
            engine: EngineSpec {
                command: config.engine.command.clone(),
                tool: config.engine.tool.clone(),
                env: config
                    .engine
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            },
            categories,
            input_root,
            output_root,
            scratch_root: config.scratch.root.clone(),
            removal_policy: RemovalPolicy::new(
                config.scratch.safe_prefix.clone(),
                config.scratch.min_path_len,
            ),
            aslr_control: config.preflight.aslr_control.clone(),
            executor: CommandExecutor::new(CommandExecutorConfig::with_timeout(
                config.engine.timeout(),
            )),
            validator: TraceValidator::new(config.engine.completion_marker.clone()),
            parallelism: config.run.parallelism(),
            package: config.run.package,
            promote_logs: config.run.promote_logs,
            skip_files: config.run.skip_files.clone(),
            seed: config.run.seed,
        })
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Preflight, scratch setup, fan-out, then promotion and cleanup.
    ///
    /// Only environment problems and promotion I/O failures are errors; failed
    /// jobs are part of the returned summary.
    pub fn trace_all(
        &self,
        rng: &mut dyn RngCore,
        cancel: &CancellationToken,
        sink: &dyn DiagnosticsSink,
    ) -> Result<RunSummary, OrchestratorError> {
        let run_started = Instant::now();
        let preflight = Preflight {
            aslr_control: &self.aslr_control,
            scratch_root: &self.scratch_root,
            input_root: &self.input_root,
            categories: &self.categories,
        };
        preflight.validate(&self.target, sink)?;

        sink.info(&format!("Using files at {:?}", self.input_root));
        sink.info(&format!(
            "Generating temporary directory at {:?}",
            self.scratch_root
        ));
        // Output first: a failure here must not leave a scratch root behind.
        for dir in std::iter::once(self.output_root.clone()).chain(
            self.categories
                .iter()
                .map(|c| self.output_root.join(c.as_str())),
        ) {
            std::fs::create_dir_all(&dir)
                .map_err(|source| OrchestratorError::Output { path: dir, source })?;
        }
        let scratch = ScratchArea::setup(&self.scratch_root, &self.categories)?;

        let runner = JobRunner {
            engine: self.engine.clone(),
            target: self.target.clone(),
            executor: self.executor.clone(),
            validator: self.validator.clone(),
            input_root: self.input_root.clone(),
            scratch_root: scratch.root().to_path_buf(),
            package: self.package,
            skip_files: self.skip_files.iter().cloned().collect(),
        };
        let scheduler = FanOutScheduler::new(&runner, self.parallelism);
        let fan_out = match scheduler.run_all(&self.categories, rng, cancel, sink) {
            Ok(fan_out) => fan_out,
            Err(e) => {
                sink.critical(&format!("[!] {e}"));
                let _ = scratch.teardown(&self.removal_policy, sink);
                return Err(e.into());
            }
        };

        let finalizer = Finalizer {
            target: &self.target,
            input_root: &self.input_root,
            output_root: &self.output_root,
            removal_policy: &self.removal_policy,
            promote_logs: self.promote_logs,
            parallelism: self.parallelism,
            seed: self.seed,
        };
        let summary = finalizer.finalize(scratch, fan_out, run_started, sink)?;
        sink.info("Finished tracing run");
        Ok(summary)
    }
}
