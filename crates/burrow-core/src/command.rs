//! Bounded execution of external configuration commands (`ip`, `iptables`).
//!
//! Every invocation gets a deadline. A command that outlives it is killed
//! and reported as [`BurrowError::Timeout`]; a non-zero exit is reported as
//! [`BurrowError::Command`] carrying the captured stderr.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use burrow_common::error::{BurrowError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Output of a command that exited.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit status.
    pub status: ExitStatus,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Runs external commands with a shared deadline.
#[derive(Debug, Clone, Copy)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    /// Creates a runner that kills commands running longer than `timeout`.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Deadline applied to each command.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Runs `program` with `args` and requires a zero exit status.
    ///
    /// # Errors
    ///
    /// Returns [`BurrowError::Command`] on spawn failure or non-zero exit,
    /// and [`BurrowError::Timeout`] if the deadline passes.
    pub fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        let output = self.output(program, args)?;
        if output.status.success() {
            return Ok(output.stdout);
        }
        Err(BurrowError::Command {
            command: command_line(program, args),
            message: format!("{}: {}", output.status, output.stderr.trim()),
        })
    }

    /// Runs `program` with `args` and reports whether it exited zero.
    ///
    /// Used for probes such as `iptables -C` whose exit status is the answer.
    ///
    /// # Errors
    ///
    /// Returns an error only if the command cannot be spawned or times out.
    pub fn succeeds(&self, program: &str, args: &[&str]) -> Result<bool> {
        Ok(self.output(program, args)?.status.success())
    }

    /// Runs `program` with `args` and returns whatever it produced.
    ///
    /// # Errors
    ///
    /// Returns an error if the command cannot be spawned or times out.
    pub fn output(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let line = command_line(program, args);
        tracing::debug!(command = %line, "running");
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BurrowError::Command {
                command: line.clone(),
                message: format!("spawn failed: {e}"),
            })?;
        self.wait(child, line)
    }

    fn wait(&self, mut child: Child, line: String) -> Result<CommandOutput> {
        // Drain both pipes while waiting so a chatty command cannot block on
        // a full pipe buffer.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return Ok(CommandOutput {
                        status,
                        stdout: collect(stdout),
                        stderr: collect(stderr),
                    });
                }
                Ok(None) if start.elapsed() >= self.timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(command = %line, timeout = ?self.timeout, "command killed");
                    return Err(BurrowError::Timeout {
                        command: line,
                        timeout: self.timeout,
                    });
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(BurrowError::Command {
                        command: line,
                        message: format!("wait failed: {e}"),
                    });
                }
            }
        }
    }
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(reader: Option<JoinHandle<String>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}
