use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// An argv-style command: a program and its discrete arguments.
///
/// Arguments are never joined into a shell string for execution; `Display`
/// is only used for reports and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Classification of a finished command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Nonzero exit. `None` when the process was terminated by a signal.
    ToolFailure(Option<i32>),
    Timeout,
}

/// Raw result of running a command through the runner.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: CommandSpec,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub timed_out: bool,
    pub timeout: Duration,
}

impl CommandResult {
    pub fn outcome(&self) -> Outcome {
        if self.timed_out {
            Outcome::Timeout
        } else if self.exit_code == Some(0) {
            Outcome::Success
        } else {
            Outcome::ToolFailure(self.exit_code)
        }
    }

    pub fn success(&self) -> bool {
        self.outcome() == Outcome::Success
    }
}

/// Captured output of a command, as it appears in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub command: String,
    pub return_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Normalized result of one analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalyzerReport {
    Success(CommandOutput),
    ToolFailure(CommandOutput),
    Timeout {
        #[serde(flatten)]
        output: CommandOutput,
        timeout_secs: u64,
    },
    /// The analyzer was not run because a precondition did not hold.
    Skipped { reason: String },
    /// The analyzer could not be run at all (e.g. the executable is missing).
    Error { error: String },
}

impl AnalyzerReport {
    pub fn status(&self) -> &'static str {
        match self {
            AnalyzerReport::Success(_) => "success",
            AnalyzerReport::ToolFailure(_) => "tool_failure",
            AnalyzerReport::Timeout { .. } => "timeout",
            AnalyzerReport::Skipped { .. } => "skipped",
            AnalyzerReport::Error { .. } => "error",
        }
    }

    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            AnalyzerReport::Success(output) | AnalyzerReport::ToolFailure(output) => Some(output),
            AnalyzerReport::Timeout { output, .. } => Some(output),
            AnalyzerReport::Skipped { .. } | AnalyzerReport::Error { .. } => None,
        }
    }
}

impl From<CommandResult> for AnalyzerReport {
    fn from(result: CommandResult) -> Self {
        let outcome = result.outcome();
        let timeout_secs = result.timeout.as_secs();
        let output = CommandOutput {
            command: result.command.to_string(),
            return_code: result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
        };
        match outcome {
            Outcome::Success => AnalyzerReport::Success(output),
            Outcome::ToolFailure(_) => AnalyzerReport::ToolFailure(output),
            Outcome::Timeout => AnalyzerReport::Timeout {
                output,
                timeout_secs,
            },
        }
    }
}

/// Reports of a `run-all` invocation keyed by analyzer name.
pub type RunReport = BTreeMap<String, AnalyzerReport>;
