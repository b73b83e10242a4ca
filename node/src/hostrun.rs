//! This module implements a host-process execution adapter for local
//! development: it runs interpreted submissions directly through the host
//! interpreter with a wall clock timeout and no isolation whatsoever.
//!
//! This is NOT a sandbox. It enforces the time limit best-effort, does not
//! enforce the memory limit and must never see untrusted code. A production
//! node wires a real sandbox executor behind the same trait.
//!

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use grading::sandbox::{ErrorKind, Result};
use grading::{ExecutionReport, ExecutionRequest, Language, Sandbox, Termination};

/// Interval between child liveness polls.
const WAIT_POLL: Duration = Duration::from_millis(10);

/// Executes interpreted programs on the host, without isolation.
pub struct HostSandbox;

impl HostSandbox {
    /// Create a new `HostSandbox`.
    pub fn new() -> Self {
        HostSandbox
    }

    /// Build the interpreter invocation for the given language, or `None`
    /// when the host adapter cannot run it.
    fn interpreter(language: Language, source: &str) -> Option<Command> {
        let mut command = match language {
            Language::Python => {
                let mut c = Command::new("python3");
                c.arg("-c").arg(source);
                c
            }
            Language::JavaScript => {
                let mut c = Command::new("node");
                c.arg("-e").arg(source);
                c
            }
            _ => return None,
        };
        command.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Some(command)
    }

    /// Wait for the child to exit within the deadline, killing it on
    /// expiry. Returns `None` when the child was killed for timing out.
    fn wait_with_deadline(child: &mut Child, deadline: Instant)
        -> std::io::Result<Option<std::process::ExitStatus>> {
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(Some(status));
            }
            if Instant::now() >= deadline {
                child.kill().ok();
                child.wait()?;
                return Ok(None);
            }
            std::thread::sleep(WAIT_POLL);
        }
    }
}

/// Drain a child output pipe on its own thread so that a chatty program
/// cannot deadlock against a full pipe buffer.
fn drain<R>(mut pipe: R) -> std::thread::JoinHandle<String>
    where R: Read + Send + 'static {
    std::thread::spawn(move || {
        let mut buffer = String::new();
        pipe.read_to_string(&mut buffer).ok();
        buffer
    })
}

impl Sandbox for HostSandbox {
    fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionReport> {
        let mut command = Self::interpreter(request.language, &request.source)
            .ok_or_else(|| ErrorKind::Unavailable(format!(
                "no host toolchain for language `{}`", request.language)))?;

        let started = Instant::now();
        let mut child = command.spawn()
            .map_err(|e| ErrorKind::Unavailable(format!("failed to spawn interpreter: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits without reading its input breaks the pipe;
            // that is its own business.
            stdin.write_all(request.stdin.as_bytes()).ok();
        }
        let stdout = drain(child.stdout.take().expect("child stdout was not piped"));
        let stderr = drain(child.stderr.take().expect("child stderr was not piped"));

        let deadline = started + Duration::from_millis(request.time_limit_ms);
        let status = Self::wait_with_deadline(&mut child, deadline)
            .map_err(|e| ErrorKind::Unavailable(format!("failed to wait for interpreter: {}", e)))?;
        let wall_time_ms = started.elapsed().as_millis() as u64;

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();

        let (termination, exit_code) = match status {
            None => (Termination::Timeout, 0),
            Some(status) => match status.code() {
                Some(code) => (Termination::Normal, code),
                None => {
                    use std::os::unix::process::ExitStatusExt;
                    (Termination::Signal(status.signal().unwrap_or(0)), 0)
                }
            },
        };

        Ok(ExecutionReport {
            stdout,
            stderr,
            exit_code,
            wall_time_ms,
            // The host adapter does not measure memory; the limit is passed
            // through unenforced.
            peak_memory_kb: 0,
            termination,
            compile_output: String::new(),
        })
    }
}
