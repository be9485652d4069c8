use crate::diagnostics::DiagnosticsSink;
use std::path::Path;

/// The kernel truncates `/proc/<pid>/comm` to this many bytes.
const COMM_LEN: usize = 15;

/// Decides whether a process is an instance of the program called `name`.
///
/// `comm` is compared against `name` truncated the way the kernel truncates
/// it; the basename of `argv[0]` (first NUL-separated field of `cmdline`) is
/// compared in full.
pub fn process_matches(comm: &str, cmdline: &[u8], name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    let truncated = truncate_utf8(name, COMM_LEN);
    if comm.trim_end_matches('\n') == truncated {
        return true;
    }
    let argv0 = cmdline.split(|b| *b == 0).next().unwrap_or_default();
    if argv0.is_empty() {
        return false;
    }
    let argv0 = String::from_utf8_lossy(argv0);
    Path::new(argv0.as_ref())
        .file_name()
        .is_some_and(|base| base == name)
}

fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Sends SIGKILL to every process named `name` except ourselves and returns
/// how many were signalled.
#[cfg(target_os = "linux")]
pub fn kill_strays(name: &str, sink: &dyn DiagnosticsSink) -> usize {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let own_pid = std::process::id();
    let entries = match std::fs::read_dir("/proc") {
        Ok(entries) => entries,
        Err(e) => {
            sink.warn(&format!("Cannot scan /proc for stray '{name}' processes: {e}"));
            return 0;
        }
    };

    let mut killed = 0;
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        if pid == own_pid {
            continue;
        }
        // Processes may exit while we look at them; unreadable entries are skipped.
        let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) else {
            continue;
        };
        let cmdline = std::fs::read(entry.path().join("cmdline")).unwrap_or_default();
        if !process_matches(&comm, &cmdline, name) {
            continue;
        }
        #[allow(clippy::cast_possible_wrap)]
        let target = Pid::from_raw(pid as i32);
        match kill(target, Signal::SIGKILL) {
            Ok(()) => {
                sink.debug(&format!("Sent SIGKILL to stray {name} (pid {pid})"));
                killed += 1;
            }
            Err(e) => sink.debug(&format!("Could not kill {name} (pid {pid}): {e}")),
        }
    }
    killed
}

#[cfg(not(target_os = "linux"))]
pub fn kill_strays(name: &str, sink: &dyn DiagnosticsSink) -> usize {
    sink.warn(&format!(
        "Stray process cleanup is only supported on Linux; not killing '{name}'"
    ));
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemorySink;

    #[test]
    fn comm_match_respects_kernel_truncation() {
        let name = "very_long_target_name_x86";
        assert!(process_matches("very_long_targe\n", b"", name));
        assert!(!process_matches("very_long_targ\n", b"", name));
        assert!(process_matches("tiff2pdf\n", b"", "tiff2pdf"));
    }

    #[test]
    fn argv0_basename_matches_when_comm_differs() {
        let cmdline = b"/opt/targets/tiff2pdf\0-o\0/dev/null\0";
        assert!(process_matches("pin\n", cmdline, "tiff2pdf"));
        assert!(!process_matches("pin\n", cmdline, "tiff2p"));
        assert!(!process_matches("pin\n", b"", "tiff2pdf"));
    }

    #[test]
    fn empty_name_never_matches() {
        assert!(!process_matches("", b"", ""));
        assert!(!process_matches("\n", b"\0", ""));
    }

    #[test]
    fn truncation_does_not_split_characters() {
        assert_eq!(truncate_utf8("abcdefghijklmnoé", 16), "abcdefghijklmno");
        assert_eq!(truncate_utf8("short", 15), "short");
    }

    #[test]
    fn no_matching_process_kills_nothing() {
        let sink = MemorySink::new();
        assert_eq!(kill_strays("tracefan_no_such_process_4711", &sink), 0);
    }
}
