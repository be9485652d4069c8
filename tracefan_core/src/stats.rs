use crate::job::{JobOutcome, JobReport};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const STATS_TEXT_FILE: &str = "stats.txt";
pub const STATS_JSON_FILE: &str = "stats.json";

/// Aggregate figures for one run, persisted next to the promoted output.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub input_root: PathBuf,
    /// Jobs that ran (reserved non-input files excluded).
    pub processed: usize,
    pub valid: usize,
    /// `valid / processed`, 0 for an empty run.
    pub valid_fraction: f64,
    /// Invalid jobs keyed by reason.
    pub invalid: BTreeMap<String, usize>,
    pub timed_out: usize,
    pub process_errors: usize,
    pub cancelled: usize,
    pub parallelism: usize,
    pub trace_secs: f64,
    /// `parallelism * trace_secs / processed`: wall time a single input costs a worker.
    pub avg_secs_per_input: f64,
    pub cleanup_secs: f64,
    pub total_secs: f64,
    pub strays_killed: usize,
    pub seed: Option<u64>,
}

impl RunStatistics {
    pub fn from_reports(
        input_root: &Path,
        reports: &[JobReport],
        parallelism: usize,
        trace_time: Duration,
    ) -> Self {
        let mut stats = RunStatistics {
            input_root: input_root.to_path_buf(),
            processed: reports.len(),
            valid: 0,
            valid_fraction: 0.0,
            invalid: BTreeMap::new(),
            timed_out: 0,
            process_errors: 0,
            cancelled: 0,
            parallelism,
            trace_secs: trace_time.as_secs_f64(),
            avg_secs_per_input: 0.0,
            cleanup_secs: 0.0,
            total_secs: 0.0,
            strays_killed: 0,
            seed: None,
        };
        for report in reports {
            match &report.outcome {
                JobOutcome::Valid => stats.valid += 1,
                JobOutcome::Invalid(reason) => {
                    *stats.invalid.entry(reason.kind().to_string()).or_default() += 1
                }
                JobOutcome::TimedOut => stats.timed_out += 1,
                JobOutcome::ProcessError(_) => stats.process_errors += 1,
            }
        }
        if stats.processed > 0 {
            stats.valid_fraction = stats.valid as f64 / stats.processed as f64;
            stats.avg_secs_per_input =
                parallelism as f64 * stats.trace_secs / stats.processed as f64;
        }
        stats
    }

    pub fn invalid_total(&self) -> usize {
        self.invalid.values().sum()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "STATS: traced {}/{} files in {:.3}s with {} cores for {}",
            self.valid,
            self.processed,
            self.trace_secs,
            self.parallelism,
            self.input_root.display()
        )
    }

    /// Writes `stats.txt` (the summary line) and `stats.json` into `dir`.
    pub fn persist(&self, dir: &Path) -> std::io::Result<()> {
        atomic_write_bytes(
            &dir.join(STATS_TEXT_FILE),
            format!("{}\n", self.summary_line()).as_bytes(),
        )?;
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::other)?;
        atomic_write_bytes(&dir.join(STATS_JSON_FILE), &json)
    }
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("stats");
    let tmp = path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)
}
