use crate::job::{Category, CategoryError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Relative location of the tracer module inside a Pin installation.
pub const PIN_TOOL_SUBPATH: &str = "source/tools/AuroraTracer/obj-intel64/aurora_tracer.so";

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct EngineSettings {
    /// Argument vector that launches the engine, e.g. `["/opt/pin/pin"]`.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub tool: Option<PathBuf>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_completion_marker")]
    pub completion_marker: String,
    /// Extra environment for every engine run, on top of the leak-detection switch.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_timeout_ms() -> u64 {
    5 * 60 * 1000
}

pub fn default_completion_marker() -> String {
    "[=] Completed trace".to_string()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            tool: None,
            timeout_ms: default_timeout_ms(),
            completion_marker: default_completion_marker(),
            env: BTreeMap::new(),
        }
    }
}

impl EngineSettings {
    /// Fills in the engine and tool from a Pin installation root.
    pub fn with_pin_root(mut self, pin_root: &Path) -> Self {
        if self.command.is_empty() {
            self.command = vec![pin_root.join("pin").to_string_lossy().into_owned()];
        }
        if self.tool.is_none() {
            self.tool = Some(pin_root.join(PIN_TOOL_SUBPATH));
        }
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TargetSettings {
    /// Executable plus arguments; `@@` marks where the input path goes.
    #[serde(default)]
    pub command: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct RunSettings {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    pub parallelism: Option<usize>,
    #[serde(default = "default_package")]
    pub package: bool,
    pub seed: Option<u64>,
    #[serde(default)]
    pub promote_logs: bool,
    #[serde(default = "default_skip_files")]
    pub skip_files: Vec<String>,
}

pub fn default_categories() -> Vec<String> {
    vec!["crashes".to_string(), "non_crashes".to_string()]
}

fn default_package() -> bool {
    true
}

pub fn default_skip_files() -> Vec<String> {
    vec!["README.txt".to_string()]
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            input_dir: None,
            output_dir: None,
            categories: default_categories(),
            parallelism: None,
            package: default_package(),
            seed: None,
            promote_logs: false,
            skip_files: default_skip_files(),
        }
    }
}

impl RunSettings {
    /// Worker count: the configured value, else the host's logical cores.
    pub fn parallelism(&self) -> usize {
        self.parallelism
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
            .max(1)
    }

    pub fn categories(&self) -> Result<Vec<Category>, CategoryError> {
        self.categories.iter().map(|c| Category::new(c)).collect()
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct ScratchSettings {
    #[serde(default = "default_scratch_root")]
    pub root: PathBuf,
    #[serde(default = "default_safe_prefix")]
    pub safe_prefix: PathBuf,
    #[serde(default = "default_min_path_len")]
    pub min_path_len: usize,
}

pub fn default_scratch_root() -> PathBuf {
    PathBuf::from("/tmp/tm")
}

pub fn default_safe_prefix() -> PathBuf {
    PathBuf::from("/tmp/")
}

fn default_min_path_len() -> usize {
    6
}

impl Default for ScratchSettings {
    fn default() -> Self {
        Self {
            root: default_scratch_root(),
            safe_prefix: default_safe_prefix(),
            min_path_len: default_min_path_len(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct PreflightSettings {
    #[serde(default = "default_aslr_control")]
    pub aslr_control: PathBuf,
}

pub fn default_aslr_control() -> PathBuf {
    PathBuf::from("/proc/sys/kernel/randomize_va_space")
}

impl Default for PreflightSettings {
    fn default() -> Self {
        Self {
            aslr_control: default_aslr_control(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
#[serde(deny_unknown_fields)]
pub struct TracefanConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub target: TargetSettings,
    #[serde(default)]
    pub run: RunSettings,
    #[serde(default)]
    pub scratch: ScratchSettings,
    #[serde(default)]
    pub preflight: PreflightSettings,
}

impl TracefanConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, anyhow::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file at {:?}: {}", path, e))?;
        Self::from_toml_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse TOML from config file {:?}: {}", path, e)
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = TracefanConfig::from_toml_str("").unwrap();
        assert_eq!(config.engine.timeout(), Duration::from_secs(300));
        assert_eq!(config.engine.completion_marker, "[=] Completed trace");
        assert_eq!(config.run.categories, vec!["crashes", "non_crashes"]);
        assert!(config.run.package);
        assert!(!config.run.promote_logs);
        assert_eq!(config.run.skip_files, vec!["README.txt"]);
        assert_eq!(config.scratch.root, PathBuf::from("/tmp/tm"));
        assert_eq!(config.scratch.min_path_len, 6);
        assert!(config.run.parallelism() >= 1);
    }

    #[test]
    fn full_document_parses_kebab_case_keys() {
        let doc = r#"
            [engine]
            command = ["/opt/pin/pin"]
            tool = "/opt/pin/tracer.so"
            timeout-ms = 1500
            env = { MSAN_OPTIONS = "halt_on_error=1" }

            [target]
            command = ["./tiff2pdf", "@@"]

            [run]
            input-dir = "/data/in"
            output-dir = "/data/out"
            categories = ["crashes"]
            parallelism = 3
            package = false
            seed = 42
            promote-logs = true

            [scratch]
            root = "/tmp/tracefan-scratch"

            [preflight]
            aslr-control = "/tmp/aslr"
        "#;
        let config = TracefanConfig::from_toml_str(doc).unwrap();
        assert_eq!(config.engine.timeout(), Duration::from_millis(1500));
        assert_eq!(config.engine.env["MSAN_OPTIONS"], "halt_on_error=1");
        assert_eq!(config.target.command, vec!["./tiff2pdf", "@@"]);
        assert_eq!(config.run.parallelism(), 3);
        assert_eq!(config.run.seed, Some(42));
        assert!(config.run.promote_logs);
        assert_eq!(config.run.categories().unwrap()[0].as_str(), "crashes");
        assert_eq!(config.scratch.safe_prefix, PathBuf::from("/tmp/"));
        assert_eq!(config.preflight.aslr_control, PathBuf::from("/tmp/aslr"));
    }

    #[test]
    fn shipped_example_config_parses() {
        let config =
            TracefanConfig::from_toml_str(include_str!("../../tracefan.example.toml")).unwrap();
        assert_eq!(config.target.command[1], "@@");
        assert!(config.engine.env.is_empty());
        assert!(config.run.categories().is_ok());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = TracefanConfig::from_toml_str("[run]\nthreads = 4\n").unwrap_err();
        assert!(err.to_string().contains("threads"));
    }

    #[test]
    fn zero_parallelism_is_clamped_to_one() {
        let run = RunSettings {
            parallelism: Some(0),
            ..RunSettings::default()
        };
        assert_eq!(run.parallelism(), 1);
    }

    #[test]
    fn pin_root_fills_only_missing_fields() {
        let engine = EngineSettings::default().with_pin_root(Path::new("/opt/pin"));
        assert_eq!(engine.command, vec!["/opt/pin/pin"]);
        assert_eq!(
            engine.tool,
            Some(PathBuf::from("/opt/pin").join(PIN_TOOL_SUBPATH))
        );

        let custom = EngineSettings {
            command: vec!["/bin/sh".to_string(), "engine.sh".to_string()],
            ..EngineSettings::default()
        }
        .with_pin_root(Path::new("/opt/pin"));
        assert_eq!(custom.command, vec!["/bin/sh", "engine.sh"]);
    }

    #[test]
    fn load_from_file_reports_missing_path() {
        let err = TracefanConfig::load_from_file(Path::new("/nonexistent/tracefan.toml"))
            .unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
