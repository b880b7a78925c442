use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::types::{CommandResult, CommandSpec};

/// Give commands 30 minutes to finish by default.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60 * 30);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

const READ_CHUNK: usize = 8192;

/// How long to keep reading output after the process has been reaped.
/// Grandchildren that inherited the pipes may keep them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs external commands with a wall-clock timeout.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `spec` in the current working directory.
    pub fn run(&self, spec: &CommandSpec) -> Result<CommandResult> {
        self.run_in(spec, None)
    }

    /// Run `spec`, optionally in `cwd`.
    ///
    /// A nonzero exit is returned as data. Only failing to spawn or wait on the
    /// process is an error. On timeout the child is killed and the result is
    /// marked `timed_out`.
    pub fn run_in(&self, spec: &CommandSpec, cwd: Option<&Path>) -> Result<CommandResult> {
        let command_line = spec.to_string();
        log::debug!("running: {command_line}");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        // Own process group so a timeout can take down the tool's descendants too
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            command: command_line.clone(),
            source,
        })?;

        let stdout = PipeReader::spawn(child.stdout.take());
        let stderr = PipeReader::spawn(child.stderr.take());

        let start = Instant::now();
        let (status, timed_out) = match wait_with_timeout(&mut child, self.timeout) {
            Ok(waited) => waited,
            Err(source) => {
                kill_tree(&mut child);
                let _ = child.wait();
                return Err(Error::Wait {
                    command: command_line,
                    source,
                });
            }
        };
        let elapsed = start.elapsed();

        // Descendants may still hold the pipes; keep whatever was read by the deadline
        let drain_deadline = Instant::now() + DRAIN_GRACE;
        let drained = stdout.wait_until(drain_deadline) & stderr.wait_until(drain_deadline);
        if !drained {
            log::debug!("'{}' left processes holding its output open", spec.program);
            kill_group(&child);
        }
        let stdout = stdout.contents();
        let stderr = stderr.contents();
        let exit_code = status.and_then(|s| s.code());

        if timed_out {
            log::warn!(
                "'{}' timed out after {}s and was killed",
                spec.program,
                self.timeout.as_secs()
            );
        } else {
            log::debug!(
                "'{}' finished in {:.2}s with exit code {:?}",
                spec.program,
                elapsed.as_secs_f64(),
                exit_code
            );
        }

        Ok(CommandResult {
            command: spec.clone(),
            exit_code,
            stdout,
            stderr,
            elapsed,
            timed_out,
            timeout: self.timeout,
        })
    }
}

fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> std::io::Result<(Option<ExitStatus>, bool)> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((Some(status), false));
        }
        if start.elapsed() >= timeout {
            // The process may exit on its own between the check and the kill
            kill_tree(child);
            let status = child.wait().ok();
            return Ok((status, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn kill_tree(child: &mut Child) {
    kill_group(child);
    let _ = child.kill();
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    let Ok(pgid) = libc::pid_t::try_from(child.id()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created at spawn time
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// Reads a pipe on a background thread into a shared buffer, chunk by chunk.
struct PipeReader {
    buf: Arc<Mutex<Vec<u8>>>,
    handle: Option<JoinHandle<()>>,
}

impl PipeReader {
    fn spawn<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let handle = pipe.map(|mut pipe| {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut chunk = [0u8; READ_CHUNK];
                loop {
                    match pipe.read(&mut chunk) {
                        Ok(0) => break,
                        Ok(n) => buf
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .extend_from_slice(&chunk[..n]),
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(_) => break,
                    }
                }
            })
        });
        Self { buf, handle }
    }

    /// Wait for EOF until `deadline`. Returns whether the pipe was fully read.
    fn wait_until(&self, deadline: Instant) -> bool {
        let Some(handle) = &self.handle else {
            return true;
        };
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
        true
    }

    fn contents(&self) -> String {
        let bytes = self.buf.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::types::Outcome;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").arg("-c").arg(script)
    }

    #[test]
    fn test_captures_streams_and_exit_code() {
        let runner = CommandRunner::new(Duration::from_secs(10));
        let result = runner
            .run(&sh("echo out; echo err >&2; exit 3"))
            .unwrap();
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.timed_out);
        assert_eq!(result.outcome(), Outcome::ToolFailure(Some(3)));
    }

    #[test]
    fn test_success() {
        let runner = CommandRunner::default();
        let result = runner.run(&sh("true")).unwrap();
        assert!(result.success());
        assert_eq!(result.timeout, DEFAULT_COMMAND_TIMEOUT);
    }

    #[test]
    fn test_slow_command_times_out() {
        let runner = CommandRunner::new(Duration::from_secs(1));
        let start = Instant::now();
        let result = runner.run(&sh("sleep 30")).unwrap();
        assert!(result.timed_out);
        assert_eq!(result.outcome(), Outcome::Timeout);
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "runner should not block until the command finishes"
        );
    }

    #[test]
    fn test_timeout_keeps_partial_output() {
        let runner = CommandRunner::new(Duration::from_secs(1));
        let start = Instant::now();
        let result = runner
            .run(&sh("echo partial; echo progress >&2; sleep 30; true"))
            .unwrap();
        assert!(result.timed_out);
        assert_eq!(result.stdout, "partial\n");
        assert_eq!(result.stderr, "progress\n");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_background_descendant_does_not_swallow_output() {
        let runner = CommandRunner::new(Duration::from_secs(20));
        let start = Instant::now();
        let result = runner
            .run(&sh("echo important-result; (sleep 30 &); exit 1"))
            .unwrap();
        assert!(!result.timed_out);
        assert_eq!(result.exit_code, Some(1));
        assert_eq!(result.stdout, "important-result\n");
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "runner should not wait for descendants holding the pipes"
        );
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let runner = CommandRunner::default();
        let err = runner
            .run(&CommandSpec::new("nefertem-definitely-not-installed"))
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[test]
    fn test_runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let runner = CommandRunner::default();
        let result = runner.run_in(&sh("ls"), Some(dir.path())).unwrap();
        assert!(result.stdout.contains("marker.txt"));
    }

    #[test]
    fn test_large_output_does_not_deadlock() {
        let runner = CommandRunner::new(Duration::from_secs(20));
        let result = runner
            .run(&sh("i=0; while [ $i -lt 20000 ]; do echo line-$i; i=$((i+1)); done"))
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout.lines().count(), 20000);
    }
}
