pub mod config;
pub mod diagnostics;
pub mod executor;
pub mod job;
pub mod orchestrator;
pub mod packager;
pub mod preflight;
pub mod promotion;
pub mod reaper;
pub mod runner;
pub mod scheduler;
pub mod scratch;
pub mod stats;
pub mod target;
pub mod validator;

#[cfg(test)]
mod testutil;

pub use config::TracefanConfig;
pub use diagnostics::{DiagnosticsSink, MemorySink, Severity, TracingSink};
pub use executor::{CommandExecutor, CommandExecutorConfig, ExecutionStatus, ProcessSpec};
pub use job::{Category, InvalidReason, Job, JobOutcome, JobReport};
pub use orchestrator::{Orchestrator, OrchestratorError};
pub use preflight::{Preflight, PreflightError};
pub use promotion::{Finalizer, PromotionError, RunSummary};
pub use runner::{EngineSpec, JobRunner};
pub use scheduler::{CancellationToken, FanOutResult, FanOutScheduler, SchedulerError};
pub use scratch::{RemovalPolicy, ScratchArea, ScratchError};
pub use stats::RunStatistics;
pub use target::{TargetError, TargetSpec};
pub use validator::{TraceValidator, Verdict};
