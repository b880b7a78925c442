use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runner::DEFAULT_COMMAND_TIMEOUT;

/// File name looked up in the working directory and its ancestors.
pub const CONFIG_FILE_NAME: &str = ".nefertem.toml";

/// Overrides the directory holding the bundled `pylintrc` and `coafile`.
pub const CONFIG_DIR_ENV: &str = "NEFERTEM_CONFIG_DIR";

const DEFAULT_PYLINT_CONFIG: &str = "pylintrc";
const DEFAULT_COALA_CONFIG: &str = "coafile";

/// Configuration built once at start-up and passed to every analyzer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Tool configuration files and executables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_pylint_config")]
    pub pylint_config: PathBuf,
    #[serde(default = "default_coala_config")]
    pub coala_config: PathBuf,
    #[serde(default)]
    pub executables: ExecutablesConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            pylint_config: default_pylint_config(),
            coala_config: default_coala_config(),
            executables: ExecutablesConfig::default(),
        }
    }
}

/// Directory holding the default tool configuration files.
pub fn default_config_dir() -> PathBuf {
    match std::env::var_os(CONFIG_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => Path::new(env!("CARGO_MANIFEST_DIR")).join("config"),
    }
}

fn default_pylint_config() -> PathBuf {
    default_config_dir().join(DEFAULT_PYLINT_CONFIG)
}

fn default_coala_config() -> PathBuf {
    default_config_dir().join(DEFAULT_COALA_CONFIG)
}

/// Program names used to invoke each analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutablesConfig {
    #[serde(default = "default_pylint")]
    pub pylint: String,
    #[serde(default = "default_coala")]
    pub coala: String,
    #[serde(default = "default_pytest")]
    pub pytest: String,
    #[serde(default = "default_pydocstyle")]
    pub pydocstyle: String,
    #[serde(default = "default_git")]
    pub git: String,
}

fn default_pylint() -> String {
    "pylint".to_string()
}
fn default_coala() -> String {
    "coala".to_string()
}
fn default_pytest() -> String {
    "pytest".to_string()
}
fn default_pydocstyle() -> String {
    "pydocstyle".to_string()
}
fn default_git() -> String {
    "git".to_string()
}

impl Default for ExecutablesConfig {
    fn default() -> Self {
        Self {
            pylint: default_pylint(),
            coala: default_coala(),
            pytest: default_pytest(),
            pydocstyle: default_pydocstyle(),
            git: default_git(),
        }
    }
}

/// Timeouts applied to external commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Per-test timeout handed to pytest
    #[serde(default = "default_test_timeout_secs")]
    pub test_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_COMMAND_TIMEOUT.as_secs()
}

fn default_test_timeout_secs() -> u64 {
    20
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            test_timeout_secs: default_test_timeout_secs(),
        }
    }
}

impl RunnerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Wrap results in the metadata envelope instead of printing plain JSON
    #[serde(default)]
    pub annotated: bool,
}

impl Config {
    /// Load configuration from a `.nefertem.toml` file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        let config: Config = toml::from_str(&content).with_context(|| {
            format!(
                "failed to parse '{}'. Run `nefertem init` to create a valid config file",
                path.display()
            )
        })?;
        Ok(config)
    }

    /// Find `.nefertem.toml` in `dir` or any ancestor.
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        let start = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        start
            .ancestors()
            .map(|candidate| candidate.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Load from `.nefertem.toml` in the given directory or any ancestor, or return defaults.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        match Self::discover(dir) {
            Some(path) => {
                log::debug!("loading configuration from {}", path.display());
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }

    /// Generate default TOML content for `nefertem init`.
    pub fn default_toml() -> String {
        r#"# Nefertem - Python codebase checks
# See https://github.com/fridex/nefertem for documentation

[tools]
# Configuration files handed to the analyzers. When omitted, the files
# bundled with nefertem (or found in $NEFERTEM_CONFIG_DIR) are used.
# pylint_config = "/path/to/pylintrc"
# coala_config = "/path/to/coafile"

[tools.executables]
pylint = "pylint"
coala = "coala"
pytest = "pytest"
pydocstyle = "pydocstyle"
git = "git"

[runner]
# Wall-clock budget for each external command, in seconds
timeout_secs = 1800
# Per-test timeout handed to pytest, in seconds
test_timeout_secs = 20

[output]
# Wrap results in a metadata envelope and pretty-print them
annotated = false
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.tools.pylint_config.ends_with("pylintrc"));
        assert!(config.tools.coala_config.ends_with("coafile"));
        assert_eq!(config.runner.timeout_secs, 1800);
        assert_eq!(config.runner.test_timeout_secs, 20);
        assert_eq!(config.tools.executables.pylint, "pylint");
        assert!(!config.output.annotated);
    }

    #[test]
    fn test_deserialize_config() {
        let toml_str = r#"
[tools]
pylint_config = "/etc/nefertem/pylintrc"

[tools.executables]
pytest = "py.test"

[runner]
timeout_secs = 60
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.tools.pylint_config,
            PathBuf::from("/etc/nefertem/pylintrc")
        );
        // Missing keys fall back to defaults
        assert!(config.tools.coala_config.ends_with("coafile"));
        assert_eq!(config.tools.executables.pytest, "py.test");
        assert_eq!(config.tools.executables.coala, "coala");
        assert_eq!(config.runner.timeout(), Duration::from_secs(60));
        assert_eq!(config.runner.test_timeout_secs, 20);
    }

    #[test]
    fn test_default_toml_is_valid() {
        let config: Config = toml::from_str(&Config::default_toml()).unwrap();
        assert_eq!(config.runner.timeout_secs, 1800);
        assert!(!config.output.annotated);
    }

    #[test]
    fn test_load_or_default_walks_ancestors() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[output]\nannotated = true\n",
        )
        .unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let config = Config::load_or_default(&nested).unwrap();
        assert!(config.output.annotated);
    }

    #[test]
    fn test_load_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[runner]\ntimeout_secs = \"soon\"\n").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("nefertem init"));
    }
}
