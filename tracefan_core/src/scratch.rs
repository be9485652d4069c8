use crate::diagnostics::DiagnosticsSink;
use crate::job::{Category, LOGS_DIR};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScratchError {
    /// The scratch root does not look like a temporary path; deleting it could
    /// destroy unrelated data.
    #[error("Scratch path might be not what you expect; skipping deletion - path is {0:?}")]
    UnsafeRemoval(PathBuf),
    #[error("Scratch I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// What a scratch root must look like before it may be removed recursively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemovalPolicy {
    pub safe_prefix: PathBuf,
    /// Paths whose textual length is below this are refused.
    pub min_path_len: usize,
}

impl RemovalPolicy {
    pub fn new(safe_prefix: impl Into<PathBuf>, min_path_len: usize) -> Self {
        Self {
            safe_prefix: safe_prefix.into(),
            min_path_len,
        }
    }

    /// A path is safe to delete only if it is non-empty, long enough, free of
    /// `..` components, and strictly below the safe prefix.
    pub fn permits(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        if text.is_empty() || text.len() < self.min_path_len {
            return false;
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return false;
        }
        path.starts_with(&self.safe_prefix) && path != self.safe_prefix.as_path()
    }
}

/// A private scratch tree mirroring the output categories plus a log directory.
///
/// ```text
/// <root>/
///   <category>/...      trace artifacts
///   logs/<category>/... engine logs
/// ```
#[derive(Debug)]
pub struct ScratchArea {
    root: PathBuf,
    categories: Vec<Category>,
}

impl ScratchArea {
    /// Creates the scratch root and every category and log subdirectory.
    pub fn setup(root: &Path, categories: &[Category]) -> Result<Self, ScratchError> {
        let mkdir = |path: PathBuf| {
            fs::create_dir_all(&path).map_err(|source| ScratchError::Io { path, source })
        };
        mkdir(root.to_path_buf())?;
        for category in categories {
            mkdir(root.join(category.as_str()))?;
            mkdir(root.join(LOGS_DIR).join(category.as_str()))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            categories: categories.to_vec(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn category_dir(&self, category: &Category) -> PathBuf {
        self.root.join(category.as_str())
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    /// Removes the scratch tree, provided `policy` accepts its root.
    ///
    /// A refusal is reported at critical severity and returned as
    /// [`ScratchError::UnsafeRemoval`]; the tree is left for manual inspection.
    /// A failed removal is reported at error severity before it is returned.
    pub fn teardown(
        self,
        policy: &RemovalPolicy,
        sink: &dyn DiagnosticsSink,
    ) -> Result<(), ScratchError> {
        if !policy.permits(&self.root) {
            let err = ScratchError::UnsafeRemoval(self.root);
            sink.critical(&err.to_string());
            return Err(err);
        }
        sink.info(&format!("Deleting temporary directory {:?}", self.root));
        fs::remove_dir_all(&self.root).map_err(|source| {
            let err = ScratchError::Io {
                path: self.root.clone(),
                source,
            };
            sink.error(&format!("Failed to delete temporary directory: {err}"));
            err
        })
    }
}
