use std::path::{Path, PathBuf};
use thiserror::Error;

/// Placeholder substituted by the input path inside target arguments.
pub const INPUT_PLACEHOLDER: &str = "@@";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TargetError {
    #[error("Target command is empty")]
    EmptyCommand,
}

/// How an input file reaches the traced target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputDelivery {
    /// The input file is opened and connected to the target's stdin.
    StdIn(PathBuf),
    /// The input path was substituted into the argument vector.
    Argument,
}

/// A fully resolved target command line for one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetInvocation {
    pub argv: Vec<String>,
    pub delivery: InputDelivery,
}

/// The program under trace: an executable plus an argument template.
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    command: Vec<String>,
}

impl TargetSpec {
    pub fn new(command: Vec<String>) -> Result<Self, TargetError> {
        match command.first() {
            Some(exe) if !exe.trim().is_empty() => Ok(Self { command }),
            _ => Err(TargetError::EmptyCommand),
        }
    }

    pub fn executable(&self) -> &str {
        &self.command[0]
    }

    /// Basename of the executable, used to find stray processes after a run.
    pub fn executable_name(&self) -> String {
        Path::new(self.executable())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.executable().to_string())
    }

    pub fn takes_input_as_argument(&self) -> bool {
        self.command.iter().any(|a| a.contains(INPUT_PLACEHOLDER))
    }

    /// Builds the target's argument vector for `input`.
    ///
    /// Every `@@` in every argument is replaced by the input path. If the
    /// template has no placeholder, the argument vector is left untouched and
    /// the input is delivered on stdin instead.
    pub fn invocation_for(&self, input: &Path) -> TargetInvocation {
        if !self.takes_input_as_argument() {
            return TargetInvocation {
                argv: self.command.clone(),
                delivery: InputDelivery::StdIn(input.to_path_buf()),
            };
        }
        let input_str = input.to_string_lossy();
        let argv = self
            .command
            .iter()
            .map(|a| a.replace(INPUT_PLACEHOLDER, &input_str))
            .collect();
        TargetInvocation {
            argv,
            delivery: InputDelivery::Argument,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(parts: &[&str]) -> TargetSpec {
        TargetSpec::new(parts.iter().map(|s| s.to_string()).collect()).unwrap()
    }

    #[test]
    fn empty_command_is_rejected() {
        assert_eq!(TargetSpec::new(vec![]), Err(TargetError::EmptyCommand));
        assert_eq!(
            TargetSpec::new(vec!["  ".to_string()]),
            Err(TargetError::EmptyCommand)
        );
    }

    #[test]
    fn placeholder_is_substituted_in_every_argument() {
        let target = spec(&["/opt/bin/objdump", "-d", "@@", "--out=@@.txt"]);
        let inv = target.invocation_for(Path::new("/in/crashes/id:000001"));
        assert_eq!(
            inv.argv,
            vec![
                "/opt/bin/objdump",
                "-d",
                "/in/crashes/id:000001",
                "--out=/in/crashes/id:000001.txt"
            ]
        );
        assert_eq!(inv.delivery, InputDelivery::Argument);
    }

    #[test]
    fn missing_placeholder_feeds_stdin() {
        let target = spec(&["./readelf", "-a"]);
        let inv = target.invocation_for(Path::new("/in/non_crashes/b"));
        assert_eq!(inv.argv, vec!["./readelf", "-a"]);
        assert_eq!(
            inv.delivery,
            InputDelivery::StdIn(PathBuf::from("/in/non_crashes/b"))
        );
    }

    #[test]
    fn input_path_with_spaces_stays_one_argument() {
        let target = spec(&["./t", "@@"]);
        let inv = target.invocation_for(Path::new("/in/crashes/a b;rm -rf x"));
        assert_eq!(inv.argv.len(), 2);
        assert_eq!(inv.argv[1], "/in/crashes/a b;rm -rf x");
    }

    #[test]
    fn executable_name_is_the_basename() {
        assert_eq!(spec(&["/usr/local/bin/tiff2pdf", "@@"]).executable_name(), "tiff2pdf");
        assert_eq!(spec(&["mruby"]).executable_name(), "mruby");
    }
}
