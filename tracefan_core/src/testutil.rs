//! A throwaway corpus plus a fake instrumentation engine for tests.
//!
//! The engine is a POSIX shell script run through `/bin/sh`. It parses the
//! engine command line, reads the input (last target argument, or stdin when
//! the target takes none), and behaves according to the input's contents.

use crate::runner::EngineSpec;
use std::fs;
use std::path::PathBuf;

/// One completed trace, 10-byte artifact.
pub const ONE_TRACE: &str = "one";
/// No completion marker in the log.
pub const NO_TRACE: &str = "none";
/// Two completion markers in the log.
pub const TWO_TRACES: &str = "two";
/// One marker, zero-byte artifact.
pub const EMPTY_TRACE: &str = "empty";
/// One marker, then the engine exits 139.
pub const ONE_TRACE_THEN_CRASH: &str = "crash";
/// Writes a partial artifact, then sleeps far past any test timeout.
pub const HANG: &str = "hang";

const ENGINE_SCRIPT: &str = r#"
while [ "$#" -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    -logfile) log="$2"; shift 2 ;;
    -t) shift 2 ;;
    --) shift; break ;;
    *) shift ;;
  esac
done
shift
if [ "$#" -gt 0 ]; then
  for last in "$@"; do :; done
  mode=$(cat "$last")
else
  mode=$(cat)
fi
marker='[=] Completed trace'
case "$mode" in
  one) printf '0123456789' > "$out"; printf '[I] start\n%s\n' "$marker" > "$log" ;;
  none) printf '0123456789' > "$out"; printf '[W] image load failed\n' > "$log" ;;
  two) printf 'xx' > "$out"; printf '%s\n%s\n' "$marker" "$marker" > "$log" ;;
  empty) : > "$out"; printf '%s\n' "$marker" > "$log" ;;
  crash) printf '0123456789' > "$out"; printf '%s\n[E] target crashed\n' "$marker" > "$log"; exit 139 ;;
  hang) printf 'partial' > "$out"; sleep 30 ;;
  *) exit 2 ;;
esac
"#;

pub struct FakeCorpus {
    dir: tempfile::TempDir,
}

impl FakeCorpus {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        fs::create_dir_all(dir.path().join("input")).expect("create input dir");
        fs::write(dir.path().join("engine.sh"), ENGINE_SCRIPT).expect("write fake engine");
        Self { dir }
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn input_root(&self) -> PathBuf {
        self.dir.path().join("input")
    }

    pub fn scratch_root(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    pub fn output_root(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    /// Adds an input whose contents select the fake engine's behaviour.
    pub fn add(&self, category: &str, name: &str, mode: &str) {
        let dir = self.input_root().join(category);
        fs::create_dir_all(&dir).expect("create category dir");
        fs::write(dir.join(name), mode).expect("write input");
    }

    pub fn add_category(&self, category: &str) {
        fs::create_dir_all(self.input_root().join(category)).expect("create category dir");
    }

    pub fn engine(&self) -> EngineSpec {
        EngineSpec {
            command: vec![
                "/bin/sh".to_string(),
                self.dir.path().join("engine.sh").to_string_lossy().into_owned(),
            ],
            tool: None,
            env: Vec::new(),
        }
    }

    /// A stand-in target binary: executable, not a script.
    #[cfg(unix)]
    pub fn target_binary(&self) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = self.dir.path().join("fake_target_bin");
        if !path.exists() {
            fs::write(&path, b"\x7fELF\x02\x01\x01\x00").expect("write target");
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod target");
        }
        path
    }

    /// Writes an ASLR control file holding `value`.
    pub fn aslr_control(&self, value: &str) -> PathBuf {
        let path = self.dir.path().join("randomize_va_space");
        fs::write(&path, value).expect("write aslr control");
        path
    }
}
