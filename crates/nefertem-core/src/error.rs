use std::path::PathBuf;

use thiserror::Error;

/// Conditions that abort an invocation.
///
/// A tool exiting nonzero or running out of time is not an error: those are
/// reported as data in [`crate::types::AnalyzerReport`].
#[derive(Debug, Error)]
pub enum Error {
    /// Cloning a remote repository failed
    #[error("failed to clone '{url}' (branch '{branch}'): {reason}")]
    Resolution {
        url: String,
        branch: String,
        reason: String,
    },

    /// The test runner was requested but the project has no tests directory
    #[error("no tests found in the project codebase: '{}' is not a directory", path.display())]
    MissingTests { path: PathBuf },

    /// The command could not be started
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command started but waiting on it failed
    #[error("failed to wait for '{command}': {source}")]
    Wait {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
