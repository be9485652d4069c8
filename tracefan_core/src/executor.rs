use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionStatus {
    /// Exited with status zero.
    Ok,
    /// Exited non-zero or was killed by a signal other than our own timeout kill.
    Failed {
        code: Option<i32>,
        description: String,
    },
    /// Ran past the deadline and was killed.
    Timeout,
    /// The process could not be started or supervised.
    Other(String),
}

/// Where a child's stdin comes from. Output streams are always discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StdinSource {
    Null,
    File(PathBuf),
}

/// A structured description of one child process: no shell, no string
/// interpolation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub stdin: StdinSource,
}

#[derive(Debug, Clone)]
pub struct CommandExecutorConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl CommandExecutorConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// Runs one child process to completion or until its deadline.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: CommandExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: CommandExecutorConfig) -> Self {
        Self { config }
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub fn execute(&self, spec: &ProcessSpec) -> ExecutionStatus {
        let Some((program, args)) = spec.argv.split_first() else {
            return ExecutionStatus::Other("Empty argument vector".to_string());
        };

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        match &spec.stdin {
            StdinSource::Null => {
                cmd.stdin(Stdio::null());
            }
            StdinSource::File(path) => match File::open(path) {
                Ok(f) => {
                    cmd.stdin(Stdio::from(f));
                }
                Err(e) => {
                    return ExecutionStatus::Other(format!(
                        "Failed to open stdin file {path:?}: {e}"
                    ));
                }
            },
        }

        // Own process group, so a timeout takes the traced target down with
        // the engine.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionStatus::Other(format!(
                    "Failed to spawn command '{:?}': {}",
                    spec.argv, e
                ));
            }
        };

        match self.run_and_wait_with_timeout(child) {
            Ok(status) if status.success() => ExecutionStatus::Ok,
            Ok(status) => ExecutionStatus::Failed {
                code: status.code(),
                description: describe_exit(&status),
            },
            Err(status) => status,
        }
    }

    fn run_and_wait_with_timeout(&self, mut child: Child) -> Result<ExitStatus, ExecutionStatus> {
        let start_time = Instant::now();

        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {
                    if start_time.elapsed() > self.config.timeout {
                        if let Err(e) = kill_process_tree(&mut child) {
                            return Err(ExecutionStatus::Other(format!(
                                "Failed to kill timed-out process: {e}",
                            )));
                        }
                        // Reap it; the status is meaningless after our SIGKILL.
                        let _ = child.wait();
                        return Err(ExecutionStatus::Timeout);
                    }
                    std::thread::sleep(self.config.poll_interval);
                }
                Err(e) => {
                    let _ = kill_process_tree(&mut child);
                    let _ = child.wait();
                    return Err(ExecutionStatus::Other(format!(
                        "Error waiting for child: {e}",
                    )));
                }
            }
        }
    }
}

#[cfg(unix)]
fn kill_process_tree(child: &mut Child) -> std::io::Result<()> {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    #[allow(clippy::cast_possible_wrap)]
    let pgid = Pid::from_raw(child.id() as i32);
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(_) => child.kill(),
    }
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("Exited with code {code}");
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("Terminated by signal {signal}");
        }
    }
    "Exited abnormally".to_string()
}
