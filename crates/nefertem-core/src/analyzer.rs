use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::runner::CommandRunner;
use crate::types::{AnalyzerReport, CommandSpec};

/// Directory the test runner expects inside the project.
pub const TESTS_DIR: &str = "tests";

/// pydocstyle `--match` pattern skipping `test_*.py` files.
pub const NON_TEST_FILES_PATTERN: &str = r"(?!test_).*\.py";

/// Trait that each wrapped tool must implement.
pub trait Analyzer: Send + Sync {
    /// Analyzer name, also used as the key in aggregated reports.
    fn name(&self) -> &'static str;

    /// Check preconditions before any process is spawned.
    fn preflight(&self, _project: &Path) -> Result<()> {
        Ok(())
    }

    /// Build the argument list for `project`.
    fn command(&self, project: &Path, config: &Config) -> CommandSpec;
}

/// Run `analyzer` against `project` and normalize its result.
///
/// The tool's own failures (nonzero exit, timeout) are part of the returned
/// report. Errors are reserved for failed preconditions and runner faults.
pub fn run_analyzer(
    analyzer: &dyn Analyzer,
    project: &Path,
    config: &Config,
    runner: &CommandRunner,
) -> Result<AnalyzerReport> {
    log::debug!("running {}...", analyzer.name());
    analyzer.preflight(project)?;
    let result = runner.run(&analyzer.command(project, config))?;
    Ok(AnalyzerReport::from(result))
}

/// Render a project path as a positional argument that cannot be read as a flag.
fn project_arg(project: &Path) -> String {
    let arg = project.to_string_lossy();
    if arg.starts_with('-') {
        format!(".{}{arg}", std::path::MAIN_SEPARATOR)
    } else {
        arg.into_owned()
    }
}

fn enabled_flags<const N: usize>(table: [(bool, &'static str); N]) -> Vec<&'static str> {
    table
        .into_iter()
        .filter_map(|(enabled, flag)| enabled.then_some(flag))
        .collect()
}

/// PyLint with the configured rcfile.
#[derive(Debug, Clone, Default)]
pub struct Pylint;

impl Analyzer for Pylint {
    fn name(&self) -> &'static str {
        "pylint"
    }

    fn command(&self, project: &Path, config: &Config) -> CommandSpec {
        CommandSpec::new(&config.tools.executables.pylint)
            .arg(format!("--rcfile={}", config.tools.pylint_config.display()))
            .arg(project_arg(project))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoalaOptions {
    pub no_color: bool,
    pub apply_patches: bool,
    pub json: bool,
}

impl Default for CoalaOptions {
    fn default() -> Self {
        Self {
            no_color: false,
            apply_patches: false,
            json: true,
        }
    }
}

impl CoalaOptions {
    fn flags(&self) -> Vec<&'static str> {
        enabled_flags([
            (self.no_color, "--no-color"),
            (self.json, "--json"),
            (self.apply_patches, "--apply-patches"),
        ])
    }
}

/// Coala bears driven by the configured coafile.
#[derive(Debug, Clone, Default)]
pub struct Coala {
    pub options: CoalaOptions,
}

impl Analyzer for Coala {
    fn name(&self) -> &'static str {
        "coala"
    }

    fn command(&self, project: &Path, config: &Config) -> CommandSpec {
        CommandSpec::new(&config.tools.executables.coala)
            .arg("--config")
            .arg(config.tools.coala_config.to_string_lossy())
            .arg("--non-interactive")
            .args(self.options.flags())
            .arg(project_arg(project))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PytestOptions {
    /// Per-test timeout in seconds. Falls back to `runner.test_timeout_secs`.
    pub test_timeout: Option<u64>,
}

/// The project's test suite under pytest with coverage.
#[derive(Debug, Clone, Default)]
pub struct Pytest {
    pub options: PytestOptions,
}

impl Pytest {
    pub fn tests_dir(project: &Path) -> PathBuf {
        project.join(TESTS_DIR)
    }
}

impl Analyzer for Pytest {
    fn name(&self) -> &'static str {
        "pytest"
    }

    fn preflight(&self, project: &Path) -> Result<()> {
        let tests = Self::tests_dir(project);
        if !tests.is_dir() {
            return Err(Error::MissingTests { path: tests });
        }
        Ok(())
    }

    fn command(&self, project: &Path, config: &Config) -> CommandSpec {
        let test_timeout = self
            .options
            .test_timeout
            .unwrap_or(config.runner.test_timeout_secs);
        let project = project_arg(project);
        CommandSpec::new(&config.tools.executables.pytest)
            .arg("--capture=no")
            .arg(format!("--cov={project}"))
            .args(["--verbose", "--verbose", "--showlocals"])
            .arg(format!("--timeout={test_timeout}"))
            .arg(project)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PydocstyleOptions {
    pub exclude_tests: bool,
}

impl Default for PydocstyleOptions {
    fn default() -> Self {
        Self {
            exclude_tests: true,
        }
    }
}

/// Docstring conventions via pydocstyle.
#[derive(Debug, Clone, Default)]
pub struct Pydocstyle {
    pub options: PydocstyleOptions,
}

impl Analyzer for Pydocstyle {
    fn name(&self) -> &'static str {
        "pydocstyle"
    }

    fn command(&self, project: &Path, config: &Config) -> CommandSpec {
        let mut cmd = CommandSpec::new(&config.tools.executables.pydocstyle);
        if self.options.exclude_tests {
            cmd = cmd.arg(format!("--match={NON_TEST_FILES_PATTERN}"));
        }
        cmd.arg(project_arg(project))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AnalyzerReport;
    use std::time::Duration;

    fn config() -> Config {
        let mut config = Config::default();
        config.tools.pylint_config = PathBuf::from("/opt/nefertem/pylintrc");
        config.tools.coala_config = PathBuf::from("/opt/nefertem/coafile");
        config
    }

    #[test]
    fn test_pylint_command() {
        let cmd = Pylint.command(Path::new("src"), &config());
        assert_eq!(cmd.to_string(), "pylint --rcfile=/opt/nefertem/pylintrc src");
    }

    #[test]
    fn test_config_path_used_even_if_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let cmd = Pylint.command(dir.path(), &config);
        assert_eq!(
            cmd.args[0],
            format!("--rcfile={}", config.tools.pylint_config.display())
        );
        assert!(!dir.path().join("pylintrc").exists());
    }

    #[test]
    fn test_coala_default_options() {
        let cmd = Coala::default().command(Path::new("proj"), &config());
        assert_eq!(
            cmd.args,
            vec![
                "--config",
                "/opt/nefertem/coafile",
                "--non-interactive",
                "--json",
                "proj"
            ]
        );
    }

    #[test]
    fn test_coala_flag_table() {
        let coala = Coala {
            options: CoalaOptions {
                no_color: true,
                apply_patches: true,
                json: false,
            },
        };
        let cmd = coala.command(Path::new("proj"), &config());
        assert_eq!(
            cmd.to_string(),
            "coala --config /opt/nefertem/coafile --non-interactive --no-color --apply-patches proj"
        );
    }

    #[test]
    fn test_pytest_command_uses_config_timeout() {
        let mut config = config();
        config.runner.test_timeout_secs = 45;
        let cmd = Pytest::default().command(Path::new("/repo"), &config);
        assert_eq!(
            cmd.args,
            vec![
                "--capture=no",
                "--cov=/repo",
                "--verbose",
                "--verbose",
                "--showlocals",
                "--timeout=45",
                "/repo"
            ]
        );
    }

    #[test]
    fn test_pytest_option_overrides_config_timeout() {
        let pytest = Pytest {
            options: PytestOptions {
                test_timeout: Some(5),
            },
        };
        let cmd = pytest.command(Path::new("/repo"), &config());
        assert!(cmd.args.contains(&"--timeout=5".to_string()));
    }

    #[test]
    fn test_pytest_preflight_requires_tests_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = Pytest::default().preflight(dir.path()).unwrap_err();
        assert!(matches!(err, Error::MissingTests { .. }));

        std::fs::create_dir(dir.path().join(TESTS_DIR)).unwrap();
        assert!(Pytest::default().preflight(dir.path()).is_ok());
    }

    #[test]
    fn test_tests_file_is_not_a_tests_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TESTS_DIR), "").unwrap();
        assert!(Pytest::default().preflight(dir.path()).is_err());
    }

    #[test]
    fn test_missing_tests_short_circuits_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        // Would fail with a spawn error if the runner were reached
        config.tools.executables.pytest = "nefertem-no-such-pytest".to_string();
        let err = run_analyzer(
            &Pytest::default(),
            dir.path(),
            &config,
            &CommandRunner::new(Duration::from_secs(5)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::MissingTests { .. }));
    }

    #[test]
    fn test_pydocstyle_exclude_tests_toggle() {
        let cmd = Pydocstyle::default().command(Path::new("pkg"), &config());
        assert_eq!(cmd.args, vec![r"--match=(?!test_).*\.py", "pkg"]);

        let include = Pydocstyle {
            options: PydocstyleOptions {
                exclude_tests: false,
            },
        };
        let cmd = include.command(Path::new("pkg"), &config());
        assert_eq!(cmd.args, vec!["pkg"]);
    }

    #[test]
    fn test_dash_prefixed_project_is_not_a_flag() {
        let cmd = Pylint.command(Path::new("-rf"), &config());
        assert_eq!(cmd.args.last().unwrap(), &format!(".{}-rf", std::path::MAIN_SEPARATOR));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_analyzer_reshapes_result() {
        let mut config = config();
        config.tools.executables.pydocstyle = "false".to_string();
        let report = run_analyzer(
            &Pydocstyle::default(),
            Path::new("."),
            &config,
            &CommandRunner::new(Duration::from_secs(5)),
        )
        .unwrap();
        match report {
            AnalyzerReport::ToolFailure(output) => {
                assert_eq!(output.return_code, Some(1));
                assert!(output.command.starts_with("false --match="));
            }
            other => panic!("expected tool failure, got {other:?}"),
        }
    }
}
