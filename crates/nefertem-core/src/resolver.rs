use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::runner::CommandRunner;
use crate::types::CommandSpec;

pub const DEFAULT_BRANCH: &str = "master";

const REMOTE_PREFIXES: &[&str] = &["https://", "http://", "ssh://", "git@"];

/// scp-like references such as `user@host:org/repo.git`
static SCP_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+@[A-Za-z0-9.-]+:[^/\\]").expect("valid scp-like pattern")
});

/// Where the analyzers should look, and whether it was fetched first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedProject {
    pub path: PathBuf,
    pub cloned: bool,
}

/// Returns true if `project` names a remote repository rather than a local path.
pub fn is_remote(project: &str) -> bool {
    REMOTE_PREFIXES
        .iter()
        .any(|prefix| project.starts_with(prefix))
        || SCP_LIKE.is_match(project)
}

/// Turns a project argument into a local directory, cloning remote repositories.
#[derive(Debug, Clone)]
pub struct RepositoryResolver {
    git: String,
    runner: CommandRunner,
}

impl RepositoryResolver {
    pub fn new(git: impl Into<String>, runner: CommandRunner) -> Self {
        Self {
            git: git.into(),
            runner,
        }
    }

    /// The `git clone` invocation used for a remote project.
    ///
    /// Only the tip of `branch` is fetched.
    pub fn clone_command(&self, url: &str, destination: &Path, branch: &str) -> CommandSpec {
        CommandSpec::new(&self.git)
            .args(["clone", "--depth", "1", "--single-branch", "--branch", branch])
            .arg(url)
            .arg(destination.to_string_lossy())
    }

    /// Resolve `project` to a local path.
    ///
    /// Local paths are returned unchanged. Remote repositories are cloned into
    /// `destination` (default: the current directory) at `branch` (default:
    /// `master`). Any clone failure is fatal.
    pub fn resolve(
        &self,
        project: &str,
        destination: Option<&Path>,
        branch: Option<&str>,
    ) -> Result<ResolvedProject> {
        if !is_remote(project) {
            return Ok(ResolvedProject {
                path: PathBuf::from(project),
                cloned: false,
            });
        }

        let destination = destination.unwrap_or_else(|| Path::new("."));
        let branch = branch.unwrap_or(DEFAULT_BRANCH);
        log::info!(
            "cloning {project} (branch {branch}) into {}",
            destination.display()
        );

        let resolution_error = |reason: String| Error::Resolution {
            url: project.to_string(),
            branch: branch.to_string(),
            reason,
        };

        let result = self
            .runner
            .run(&self.clone_command(project, destination, branch))
            .map_err(|e| resolution_error(e.to_string()))?;

        if result.timed_out {
            return Err(resolution_error(format!(
                "git clone timed out after {}s",
                result.timeout.as_secs()
            )));
        }
        if !result.success() {
            return Err(resolution_error(result.stderr.trim().to_string()));
        }

        Ok(ResolvedProject {
            path: destination.to_path_buf(),
            cloned: true,
        })
    }
}
