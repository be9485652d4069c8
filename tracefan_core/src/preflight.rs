use crate::diagnostics::DiagnosticsSink;
use crate::job::Category;
use crate::target::TargetSpec;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment problems that make a run pointless or unsafe. Any of them aborts
/// the run before a single directory is created.
#[derive(Error, Debug)]
pub enum PreflightError {
    #[error(
        "ASLR is enabled ({control} = {value}). Disable it: echo 0 | sudo tee /proc/sys/kernel/randomize_va_space"
    )]
    AslrEnabled { control: PathBuf, value: String },
    #[error("Cannot read ASLR state from {path:?}: {source}")]
    AslrUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Temporary directory {0:?} already exists. Backup its contents and delete it to proceed.")]
    ScratchExists(PathBuf),
    #[error("Target '{0}' not found")]
    TargetMissing(String),
    #[error("Target binary {path:?} is a script ({interpreter})")]
    TargetIsScript { path: PathBuf, interpreter: String },
    #[error("Target {0:?} is not an executable file")]
    TargetNotExecutable(PathBuf),
    #[error("Input category directory {0:?} does not exist")]
    CategoryMissing(PathBuf),
    #[error("Failed to inspect {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Checks the host before any tracing work begins.
#[derive(Debug, Clone)]
pub struct Preflight<'a> {
    pub aslr_control: &'a Path,
    pub scratch_root: &'a Path,
    pub input_root: &'a Path,
    pub categories: &'a [Category],
}

impl Preflight<'_> {
    /// Runs every check in order and stops at the first failure.
    ///
    /// Order: ASLR disabled, scratch root absent, target is a real executable,
    /// every input category present. Returns the resolved path of the target
    /// executable on success.
    pub fn validate(
        &self,
        target: &TargetSpec,
        sink: &dyn DiagnosticsSink,
    ) -> Result<PathBuf, PreflightError> {
        let result = self.run_checks(target);
        match &result {
            Ok(path) => sink.debug(&format!("Preflight passed for target {path:?}")),
            Err(e) => sink.critical(&format!("[!] {e}")),
        }
        result
    }

    fn run_checks(&self, target: &TargetSpec) -> Result<PathBuf, PreflightError> {
        check_aslr_disabled(self.aslr_control)?;
        if self.scratch_root.exists() {
            return Err(PreflightError::ScratchExists(self.scratch_root.to_path_buf()));
        }
        let resolved = resolve_target(target)?;
        check_not_script(&resolved)?;
        for category in self.categories {
            let dir = self.input_root.join(category.as_str());
            if !dir.is_dir() {
                return Err(PreflightError::CategoryMissing(dir));
            }
        }
        Ok(resolved)
    }
}

pub fn check_aslr_disabled(control: &Path) -> Result<(), PreflightError> {
    let value = std::fs::read_to_string(control).map_err(|source| {
        PreflightError::AslrUnreadable {
            path: control.to_path_buf(),
            source,
        }
    })?;
    let value = value.trim();
    if value != "0" {
        return Err(PreflightError::AslrEnabled {
            control: control.to_path_buf(),
            value: value.to_string(),
        });
    }
    Ok(())
}

/// Finds the target executable, consulting `PATH` for bare program names.
pub fn resolve_target(target: &TargetSpec) -> Result<PathBuf, PreflightError> {
    let exe = target.executable();
    let path = if exe.contains(std::path::MAIN_SEPARATOR) {
        PathBuf::from(exe)
    } else {
        which::which(exe).map_err(|_| PreflightError::TargetMissing(exe.to_string()))?
    };
    if !path.exists() {
        return Err(PreflightError::TargetMissing(exe.to_string()));
    }
    if !is_executable_file(&path)? {
        return Err(PreflightError::TargetNotExecutable(path));
    }
    Ok(path)
}

fn is_executable_file(path: &Path) -> Result<bool, PreflightError> {
    let meta = std::fs::metadata(path).map_err(|source| PreflightError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if !meta.is_file() {
        return Ok(false);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Ok(meta.permissions().mode() & 0o111 != 0)
    }
    #[cfg(not(unix))]
    {
        Ok(true)
    }
}

/// Refuses interpreted scripts: tracing the interpreter instead of the program
/// produces traces of the wrong binary.
pub fn check_not_script(path: &Path) -> Result<(), PreflightError> {
    let io_err = |source| PreflightError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let mut reader = BufReader::new(file);
    let mut magic = Vec::with_capacity(2);
    reader
        .by_ref()
        .take(2)
        .read_to_end(&mut magic)
        .map_err(io_err)?;
    if magic != b"#!" {
        return Ok(());
    }
    let mut rest = String::new();
    // Shebang lines are short; anything past the first line is irrelevant.
    let _ = reader.take(256).read_line(&mut rest);
    Err(PreflightError::TargetIsScript {
        path: path.to_path_buf(),
        interpreter: format!("#!{}", rest.trim_end()),
    })
}
