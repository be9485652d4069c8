use std::ffi::OsString;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Subdirectory of the scratch area holding engine logs.
pub const LOGS_DIR: &str = "logs";
/// Appended to the input filename to name its trace artifact.
pub const ARTIFACT_SUFFIX: &str = "_trace";
/// Appended to the artifact filename to name its engine log.
pub const LOG_SUFFIX: &str = ".log";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CategoryError {
    #[error("Category name is empty")]
    Empty,
    #[error("Category '{0}' must be a single plain path component")]
    NotAComponent(String),
    #[error("Category name '{0}' is reserved for engine logs")]
    Reserved(String),
}

/// A named partition of the input corpus and, symmetrically, of the output tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category(String);

impl Category {
    pub fn new(name: &str) -> Result<Self, CategoryError> {
        let name = name.trim_end_matches('/');
        if name.is_empty() {
            return Err(CategoryError::Empty);
        }
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => {}
            _ => return Err(CategoryError::NotAComponent(name.to_string())),
        }
        if name == LOGS_DIR {
            return Err(CategoryError::Reserved(name.to_string()));
        }
        Ok(Category(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One unit of work: a single input file of a single category.
///
/// Identity is `(category, filename)`; a job is never mutated after enumeration.
/// The filename is kept exactly as the file system returned it, so inputs whose
/// names are not valid UTF-8 stay distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Job {
    pub category: Category,
    pub filename: OsString,
}

impl Job {
    pub fn new(category: Category, filename: impl Into<OsString>) -> Self {
        Self {
            category,
            filename: filename.into(),
        }
    }

    pub fn input_path(&self, input_root: &Path) -> PathBuf {
        input_root.join(self.category.as_str()).join(&self.filename)
    }

    /// Scratch locations for this job's artifact and log.
    ///
    /// Both paths embed the category and the filename, so two distinct jobs
    /// never share either path.
    pub fn paths(&self, scratch_root: &Path) -> JobPaths {
        let mut artifact_name = self.filename.clone();
        artifact_name.push(ARTIFACT_SUFFIX);
        let mut log_name = artifact_name.clone();
        log_name.push(LOG_SUFFIX);
        JobPaths {
            artifact: scratch_root.join(self.category.as_str()).join(&artifact_name),
            log: scratch_root
                .join(LOGS_DIR)
                .join(self.category.as_str())
                .join(log_name),
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.filename.to_string_lossy())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    pub artifact: PathBuf,
    pub log: PathBuf,
}

/// Why a completed job did not yield a usable trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    /// The engine log is missing or unreadable.
    LogMissing,
    /// No completed-trace marker in the log.
    Incomplete,
    /// More than one completed-trace marker in the log.
    MultipleTraces(usize),
    /// The log reports a completed trace but no artifact was written.
    ArtifactMissing,
    /// The artifact has zero bytes.
    Empty,
    /// Compressing the artifact failed.
    PackagingFailed(String),
}

impl InvalidReason {
    /// Stable key used when tallying reasons in run statistics.
    pub fn kind(&self) -> &'static str {
        match self {
            InvalidReason::LogMissing => "log_missing",
            InvalidReason::Incomplete => "incomplete",
            InvalidReason::MultipleTraces(_) => "multiple_traces",
            InvalidReason::ArtifactMissing => "artifact_missing",
            InvalidReason::Empty => "empty",
            InvalidReason::PackagingFailed(_) => "packaging_failed",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::LogMissing => f.write_str("log missing"),
            InvalidReason::Incomplete => f.write_str("incomplete"),
            InvalidReason::MultipleTraces(n) => write!(f, "multiple traces ({n}x) in one file"),
            InvalidReason::ArtifactMissing => f.write_str("artifact missing"),
            InvalidReason::Empty => f.write_str("empty"),
            InvalidReason::PackagingFailed(e) => write!(f, "packaging failed: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Valid,
    Invalid(InvalidReason),
    TimedOut,
    /// The engine could not be launched or supervised at all.
    ProcessError(String),
}

/// Everything recorded about one finished job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job: Job,
    pub outcome: JobOutcome,
    /// Exit code of the engine when it ran to completion.
    pub exit_code: Option<i32>,
    /// Where the surviving artifact lives in the scratch area (valid jobs only).
    pub artifact: Option<PathBuf>,
    pub elapsed: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn category_rejects_paths_and_reserved_names() {
        assert_eq!(Category::new(""), Err(CategoryError::Empty));
        assert!(matches!(
            Category::new("a/b"),
            Err(CategoryError::NotAComponent(_))
        ));
        assert!(matches!(
            Category::new(".."),
            Err(CategoryError::NotAComponent(_))
        ));
        assert!(matches!(
            Category::new("/etc"),
            Err(CategoryError::NotAComponent(_))
        ));
        assert_eq!(
            Category::new("logs"),
            Err(CategoryError::Reserved("logs".to_string()))
        );
        assert_eq!(Category::new("crashes/").unwrap().as_str(), "crashes");
    }

    #[test]
    fn paths_follow_category_and_filename() {
        let job = Job::new(Category::new("crashes").unwrap(), "a");
        let paths = job.paths(Path::new("/tmp/tm"));
        assert_eq!(paths.artifact, PathBuf::from("/tmp/tm/crashes/a_trace"));
        assert_eq!(paths.log, PathBuf::from("/tmp/tm/logs/crashes/a_trace.log"));
        assert_eq!(
            job.input_path(Path::new("/corpus")),
            PathBuf::from("/corpus/crashes/a")
        );
    }

    #[test]
    fn same_filename_in_two_categories_does_not_collide() {
        let crashes = Category::new("crashes").unwrap();
        let non_crashes = Category::new("non_crashes").unwrap();
        let jobs = [
            Job::new(crashes.clone(), "id_000"),
            Job::new(non_crashes.clone(), "id_000"),
            Job::new(crashes, "id_001"),
            Job::new(non_crashes, "id_001"),
        ];
        let mut seen = HashSet::new();
        for job in &jobs {
            let paths = job.paths(Path::new("/tmp/tm"));
            assert!(seen.insert(paths.artifact), "artifact collision for {job}");
            assert!(seen.insert(paths.log), "log collision for {job}");
        }
    }

    #[test]
    fn invalid_reasons_render_operator_text() {
        assert_eq!(
            InvalidReason::MultipleTraces(3).to_string(),
            "multiple traces (3x) in one file"
        );
        assert_eq!(InvalidReason::Empty.to_string(), "empty");
    }

    #[cfg(unix)]
    #[test]
    fn non_utf8_names_keep_distinct_paths() {
        use std::os::unix::ffi::OsStringExt;

        let crashes = Category::new("crashes").unwrap();
        let a = Job::new(crashes.clone(), OsString::from_vec(b"a\xff".to_vec()));
        let b = Job::new(crashes, OsString::from_vec(b"a\xfe".to_vec()));
        assert_ne!(a, b);

        let root = Path::new("/tmp/tm");
        let (pa, pb) = (a.paths(root), b.paths(root));
        assert_ne!(pa.artifact, pb.artifact);
        assert_ne!(pa.log, pb.log);
        assert_eq!(
            pa.artifact,
            root.join("crashes")
                .join(OsString::from_vec(b"a\xff_trace".to_vec()))
        );
        assert_eq!(
            a.input_path(Path::new("/corpus")),
            Path::new("/corpus/crashes").join(OsString::from_vec(b"a\xff".to_vec()))
        );
    }
}
