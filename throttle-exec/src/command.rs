//! Utilities for [`std::process::Command`].

use std::{
    io::{self, Read, Write as _},
    process, thread,
    time::{Duration, Instant},
};

/// How often a running child is polled for its exit status.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The default upper bound for a single backend command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("empty command provided")]
    Empty,
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("non-zero exit status ({}): {}", .0.status, .0.stderr.trim())]
    NonZero(Output),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone)]
pub struct Output {
    pub status: process::ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl From<process::Output> for Output {
    fn from(value: process::Output) -> Self {
        Self {
            status: value.status,
            stdout: String::from_utf8_lossy(&value.stdout).to_string(),
            stderr: String::from_utf8_lossy(&value.stderr).to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Runs backend commands, optionally through `sudo`, and never waits longer than its timeout.
#[derive(Debug, Clone, Copy)]
pub struct Runner {
    sudo: bool,
    timeout: Duration,
}

impl Default for Runner {
    fn default() -> Self {
        Self { sudo: false, timeout: DEFAULT_TIMEOUT }
    }
}

impl Runner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, ..Default::default() }
    }

    /// Prefix every command with `sudo`.
    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    /// Creates a [`process::Command`] for `program`, wrapped in `sudo` if configured.
    pub fn command(&self, program: &str) -> process::Command {
        if self.sudo {
            let mut cmd = process::Command::new("sudo");
            cmd.arg(program);
            cmd
        } else {
            process::Command::new(program)
        }
    }

    /// Runs the command provided as strings, separating args with whitespaces.
    pub fn by_str(&self, cmd: &str) -> Result<Output> {
        let mut iter = cmd.split_ascii_whitespace();
        let program = iter.next().ok_or(Error::Empty)?;
        let mut cmd = self.command(program);
        cmd.args(iter);

        self.run(cmd)
    }

    /// Runs the command to completion, or kills it once the timeout expires.
    pub fn run(&self, cmd: process::Command) -> Result<Output> {
        self.spawn(cmd, None)
    }

    /// Same as [`Runner::run`], writing `input` to the standard input of the child first.
    pub fn run_with_stdin(&self, cmd: process::Command, input: &str) -> Result<Output> {
        self.spawn(cmd, Some(input))
    }

    fn spawn(&self, mut cmd: process::Command, input: Option<&str>) -> Result<Output> {
        cmd.stderr(process::Stdio::piped()).stdout(process::Stdio::piped()).stdin(
            if input.is_some() { process::Stdio::piped() } else { process::Stdio::null() },
        );

        tracing::debug!(?cmd, "running command");

        let mut child = cmd.spawn()?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            // Dropping stdin closes the pipe, so the child sees EOF.
            if let Err(e) = stdin.write_all(input.as_bytes()) {
                drop(stdin);
                let _ = child.kill();
                let _ = child.wait();
                tracing::debug!(?cmd, %e, "failed to write to stdin, killed");
                return Err(e.into());
            }
        }

        // Drain both pipes on their own threads, a chatty child would otherwise block on a
        // full pipe and never exit.
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }

            if Instant::now() >= deadline {
                // The child may exit between `try_wait` and `kill`, which is fine.
                let _ = child.kill();
                let _ = child.wait();
                tracing::debug!(?cmd, timeout = ?self.timeout, "command timed out, killed");
                return Err(Error::Timeout(self.timeout));
            }

            thread::sleep(POLL_INTERVAL);
        };

        let output: Output = process::Output {
            status,
            stdout: stdout.map(join_drain).unwrap_or_default(),
            stderr: stderr.map(join_drain).unwrap_or_default(),
        }
        .into();

        if !output.status.success() {
            tracing::debug!(?output.stderr, ?output.status, ?cmd, "command returned non-zero status");
            return Err(Error::NonZero(output));
        }

        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}
