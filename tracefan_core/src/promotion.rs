use crate::diagnostics::DiagnosticsSink;
use crate::job::LOGS_DIR;
use crate::reaper;
use crate::scheduler::FanOutResult;
use crate::scratch::{RemovalPolicy, ScratchArea};
use crate::stats::RunStatistics;
use crate::target::TargetSpec;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum PromotionError {
    #[error("Failed to promote {from:?} to {to:?}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to walk scratch tree: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Failed to write run statistics to {path:?}: {source}")]
    Stats {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// What a finished run leaves behind.
#[derive(Debug)]
pub struct RunSummary {
    pub statistics: RunStatistics,
    pub fan_out: FanOutResult,
    /// Final locations of promoted files under the output root.
    pub promoted: Vec<PathBuf>,
    /// `false` when the scratch root was kept because it failed the removal policy.
    pub scratch_removed: bool,
}

/// Single-threaded tail of a run: reap strays, promote, tear down, report.
#[derive(Debug)]
pub struct Finalizer<'a> {
    pub target: &'a TargetSpec,
    pub input_root: &'a Path,
    pub output_root: &'a Path,
    pub removal_policy: &'a RemovalPolicy,
    pub promote_logs: bool,
    pub parallelism: usize,
    pub seed: Option<u64>,
}

impl Finalizer<'_> {
    /// Must only be called once every worker has been joined.
    pub fn finalize(
        &self,
        scratch: ScratchArea,
        fan_out: FanOutResult,
        run_started: Instant,
        sink: &dyn DiagnosticsSink,
    ) -> Result<RunSummary, PromotionError> {
        let mut statistics = RunStatistics::from_reports(
            self.input_root,
            &fan_out.reports,
            self.parallelism,
            fan_out.elapsed,
        );
        statistics.cancelled = fan_out.cancelled;
        statistics.seed = self.seed;
        sink.info(&format!(
            "Done processing {} files in {:.3}s (on average {:.3}s per input)",
            statistics.processed, statistics.trace_secs, statistics.avg_secs_per_input
        ));
        sink.info(&statistics.summary_line());

        let cleanup_started = Instant::now();
        let name = self.target.executable_name();
        sink.info(&format!("Killing remaining '{name}' processes"));
        statistics.strays_killed = reaper::kill_strays(&name, sink);
        if statistics.strays_killed > 0 {
            sink.warn(&format!(
                "Killed {} stray '{name}' processes",
                statistics.strays_killed
            ));
        }

        sink.info(&format!(
            "Moving files from {:?} to {:?}",
            scratch.root(),
            self.output_root
        ));
        let mut promoted = Vec::new();
        for category in scratch.categories() {
            promoted.extend(promote_tree(
                &scratch.category_dir(category),
                &self.output_root.join(category.as_str()),
                sink,
            )?);
        }
        if self.promote_logs {
            promote_tree(&scratch.logs_dir(), &self.output_root.join(LOGS_DIR), sink)?;
        }

        let scratch_removed = scratch.teardown(self.removal_policy, sink).is_ok();
        statistics.cleanup_secs = cleanup_started.elapsed().as_secs_f64();
        sink.info(&format!("Cleanup time: {:.3}s", statistics.cleanup_secs));

        statistics.total_secs = run_started.elapsed().as_secs_f64();
        fs::create_dir_all(self.output_root)
            .and_then(|()| statistics.persist(self.output_root))
            .map_err(|source| PromotionError::Stats {
                path: self.output_root.to_path_buf(),
                source,
            })?;
        sink.info(&format!("Total execution time: {:.3}s", statistics.total_secs));

        Ok(RunSummary {
            statistics,
            fan_out,
            promoted,
            scratch_removed,
        })
    }
}

/// Moves every file below `from` to the same relative path below `to`.
pub fn promote_tree(
    from: &Path,
    to: &Path,
    sink: &dyn DiagnosticsSink,
) -> Result<Vec<PathBuf>, PromotionError> {
    let mut moved = Vec::new();
    if !from.is_dir() {
        return Ok(moved);
    }
    for entry in WalkDir::new(from).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let dest = to.join(relative);
        if dest.exists() {
            sink.warn(&format!("Overwriting existing {dest:?}"));
        }
        move_file(entry.path(), &dest).map_err(|source| PromotionError::Move {
            from: entry.path().to_path_buf(),
            to: dest.clone(),
            source,
        })?;
        moved.push(dest);
    }
    Ok(moved)
}

/// Renames `src` to `dst`. When a rename is impossible (e.g. across file
/// systems) the data is copied to a hidden sibling of `dst`, synced, renamed
/// into place, and only then is `src` removed.
pub fn move_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    let name = dst
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("promoted");
    let partial = dst.with_file_name(format!(".{name}.partial"));
    let result = (|| {
        fs::copy(src, &partial)?;
        let file = fs::OpenOptions::new().write(true).open(&partial)?;
        file.sync_all()?;
        fs::rename(&partial, dst)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&partial);
        return result;
    }
    if let Some(parent) = dst.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    fs::remove_file(src)
}
