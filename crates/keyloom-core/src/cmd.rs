//! Execution facade for the external tools KeyLoom drives.
//!
//! Everything that talks to `lszcrypt`, `zkey`, `fdectl`, or `systemctl` goes
//! through [`CommandRunner`] so tests can substitute canned output. Stdin
//! payloads are reserved for secrets and are never logged or echoed into
//! error messages.

use crate::error::{KeyloomError, KeyloomResult};
use log::debug;
use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Captured result of one external command.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Most useful diagnostic text: stderr when present, stdout otherwise.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Whether a capability probe found its backing infrastructure.
///
/// A dedicated type rather than a bool so "the host cannot do this" is never
/// confused with "the caller disabled this".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Unavailable,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn from_bool(ready: bool) -> Self {
        if ready {
            Self::Ready
        } else {
            Self::Unavailable
        }
    }
}

/// Runs an external program and captures its output.
///
/// An `Err` means the command could not be launched or supervised; a non-zero
/// exit status is ordinary data in the returned [`CmdOutput`].
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        program: &Path,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> KeyloomResult<CmdOutput>;
}

/// Production runner: spawns the child with piped stdio and polls for
/// completion under a timeout.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn wait_with_timeout(
        &self,
        program: &Path,
        mut child: Child,
        stdout_pipe: Option<ChildStdout>,
        stderr_pipe: Option<ChildStderr>,
    ) -> KeyloomResult<CmdOutput> {
        let started = Instant::now();
        let stdout_reader = spawn_output_reader(stdout_pipe);
        let stderr_reader = spawn_output_reader(stderr_pipe);
        let mut exit_status = None;

        while started.elapsed() <= self.timeout {
            if let Some(status) = child.try_wait()? {
                exit_status = Some(status);
                break;
            }
            thread::sleep(Duration::from_millis(25));
        }

        let Some(status) = exit_status else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(KeyloomError::Command {
                program: program.display().to_string(),
                detail: format!("timed out after {:?}", self.timeout),
            });
        };

        let stdout = join_reader(program, stdout_reader)?;
        let stderr = join_reader(program, stderr_reader)?;

        Ok(CmdOutput {
            stdout,
            stderr,
            status: status.code().unwrap_or(-1),
        })
    }
}

impl CommandRunner for SystemRunner {
    fn run(
        &self,
        program: &Path,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> KeyloomResult<CmdOutput> {
        debug!("running {} {}", program.display(), args.join(" "));

        let mut command = Command::new(program);
        command.args(args);
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());
        if input.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = command.spawn()?;

        if let Some(payload) = input {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(payload)?;
                stdin.flush().ok();
            }
        }

        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        self.wait_with_timeout(program, child, stdout_pipe, stderr_pipe)
    }
}

fn spawn_output_reader<R>(pipe: Option<R>) -> thread::JoinHandle<std::io::Result<String>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let Some(mut reader) = pipe else {
            return Ok(String::new());
        };
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

fn join_reader(
    program: &Path,
    handle: thread::JoinHandle<std::io::Result<String>>,
) -> KeyloomResult<String> {
    handle
        .join()
        .map_err(|_| KeyloomError::Command {
            program: program.display().to_string(),
            detail: "output reader thread panicked".into(),
        })?
        .map_err(KeyloomError::Io)
}
