use crate::diagnostics::DiagnosticsSink;
use crate::job::{Category, Job, JobReport};
use crate::runner::JobRunner;
use rand::seq::SliceRandom;
use rand_core::RngCore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Cannot list input category {path:?}: {source}")]
    Enumeration {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Cooperative run-wide cancellation. Workers check it before taking each job;
/// a job already running is never interrupted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lists every regular file of every category as a job, in a stable order.
pub fn enumerate_jobs(
    input_root: &Path,
    categories: &[Category],
    sink: &dyn DiagnosticsSink,
) -> Result<Vec<Job>, SchedulerError> {
    let mut jobs = Vec::new();
    for category in categories {
        let dir = input_root.join(category.as_str());
        let entries = std::fs::read_dir(&dir).map_err(|source| SchedulerError::Enumeration {
            path: dir.clone(),
            source,
        })?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SchedulerError::Enumeration {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.is_file() {
                sink.debug(&format!("Ignoring non-file {path:?}"));
                continue;
            }
            names.push(entry.file_name());
        }
        names.sort();
        jobs.extend(names.into_iter().map(|n| Job::new(category.clone(), n)));
    }
    Ok(jobs)
}

/// Uniformly shuffles `jobs` so that no filename or timestamp ordering can
/// correlate with processing order.
pub fn shuffle_jobs(jobs: &mut [Job], rng: &mut dyn RngCore) {
    jobs.shuffle(rng);
}

/// The outcome of a full fan-out.
#[derive(Debug)]
pub struct FanOutResult {
    pub reports: Vec<JobReport>,
    /// Jobs returned by enumeration, reserved non-inputs included.
    pub enumerated: usize,
    /// Jobs never started because the run was cancelled.
    pub cancelled: usize,
    pub elapsed: Duration,
}

/// Distributes jobs over a fixed pool of worker threads.
///
/// Jobs go through a closed multi-consumer channel; each worker pulls a job,
/// runs it end to end, and pulls the next. No job is retried or split, and
/// workers share nothing but the runner's immutable configuration.
#[derive(Debug)]
pub struct FanOutScheduler<'a> {
    runner: &'a JobRunner,
    parallelism: usize,
}

impl<'a> FanOutScheduler<'a> {
    pub fn new(runner: &'a JobRunner, parallelism: usize) -> Self {
        Self {
            runner,
            parallelism: parallelism.max(1),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Enumerates, shuffles, and runs every job of `categories`.
    pub fn run_all(
        &self,
        categories: &[Category],
        rng: &mut dyn RngCore,
        cancel: &CancellationToken,
        sink: &dyn DiagnosticsSink,
    ) -> Result<FanOutResult, SchedulerError> {
        let mut jobs = enumerate_jobs(&self.runner.input_root, categories, sink)?;
        shuffle_jobs(&mut jobs, rng);
        sink.info(&format!(
            "Processing {} files in {} subdirs at {:?}",
            jobs.len(),
            categories.len(),
            self.runner.input_root
        ));
        Ok(self.dispatch(jobs, cancel, sink))
    }

    /// Runs `jobs` in the given order across the pool and waits for all workers.
    pub fn dispatch(
        &self,
        jobs: Vec<Job>,
        cancel: &CancellationToken,
        sink: &dyn DiagnosticsSink,
    ) -> FanOutResult {
        let started = Instant::now();
        let enumerated = jobs.len();

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let (report_tx, report_rx) = crossbeam_channel::unbounded::<JobReport>();
        for job in jobs {
            // The receiver is alive until the scope below ends.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let workers = self.parallelism.min(enumerated.max(1));
        std::thread::scope(|s| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let report_tx = report_tx.clone();
                s.spawn(move || {
                    while !cancel.is_cancelled() {
                        let Ok(job) = job_rx.recv() else { break };
                        if let Some(report) = self.runner.run(&job, sink) {
                            let _ = report_tx.send(report);
                        }
                    }
                });
            }
        });
        drop(report_tx);

        let cancelled = job_rx.len();
        if cancelled > 0 {
            sink.warn(&format!("Run cancelled; {cancelled} jobs were not started"));
        }
        FanOutResult {
            reports: report_rx.iter().collect(),
            enumerated,
            cancelled,
            elapsed: started.elapsed(),
        }
    }
}
