//! Shell execution
//!
//! Turns a resolved command into an argument vector for the step's shell
//! and runs it as a child process:
//!
//! - stdout and stderr share one pipe, so lines arrive in the order the
//!   process wrote them
//! - the environment is exactly the one the executor computed; nothing is
//!   inherited from this process
//! - stdin is closed
//! - output is streamed line by line, or buffered when the command's
//!   output is being captured
//!
//! ## Shells
//!
//! | Shell | Invocation |
//! |-------|------------|
//! | `bash` (default) | `bash --noprofile --norc -eo pipefail -c CMD` |
//! | `sh` | `sh -e -c CMD` |
//! | `zsh` | `zsh --no-rcs -o pipefail -c CMD` |
//! | `fish` | `fish --private -c CMD` |
//! | `ksh` | `ksh -c "set -o pipefail; CMD"` |
//! | `dash` | `dash -e -c CMD` |
//! | `none` | `CMD` split into words, no shell |

use super::capture::CaptureBuffer;
use super::timeout::{ChildGuard, Deadline, ProcessGroups, exit_code};
use crate::pipeline::{ExecutionError, ShellKind};
use crate::resolver::PropertyMap;
use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

/// Builds the argument vector running `command` under `shell`
///
/// # Errors
///
/// Returns [`ExecutionError::InvalidCommand`] when `shell` is `none` and
/// the command has unbalanced quotes or no words.
pub fn command_arguments(shell: ShellKind, command: &str) -> Result<Vec<String>, ExecutionError> {
    let with = |prefix: &[&str]| {
        prefix
            .iter()
            .map(|s| (*s).to_string())
            .chain(std::iter::once(command.to_string()))
            .collect()
    };

    let argv = match shell {
        ShellKind::Bash => with(&["bash", "--noprofile", "--norc", "-eo", "pipefail", "-c"]),
        ShellKind::Sh => with(&["sh", "-e", "-c"]),
        ShellKind::Zsh => with(&["zsh", "--no-rcs", "-o", "pipefail", "-c"]),
        ShellKind::Fish => with(&["fish", "--private", "-c"]),
        ShellKind::Ksh => vec![
            "ksh".to_string(),
            "-c".to_string(),
            format!("set -o pipefail; {command}"),
        ],
        ShellKind::Dash => with(&["dash", "-e", "-c"]),
        ShellKind::None => {
            let words = shell_words::split(command).map_err(|e| ExecutionError::InvalidCommand {
                command: command.to_string(),
                reason: e.to_string(),
            })?;
            if words.is_empty() {
                return Err(ExecutionError::InvalidCommand {
                    command: command.to_string(),
                    reason: "no program to run".to_string(),
                });
            }
            words
        }
    };
    Ok(argv)
}

/// Checks that `path` exists, is a directory and can be listed
///
/// # Errors
///
/// Returns [`ExecutionError::WorkingDirectory`] naming what is wrong.
pub fn check_working_directory(path: &Path) -> Result<(), ExecutionError> {
    let failure = |reason: &str| ExecutionError::WorkingDirectory {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let metadata = fs::metadata(path).map_err(|_| failure("does not exist"))?;
    if !metadata.is_dir() {
        return Err(failure("is not a directory"));
    }
    fs::read_dir(path).map_err(|_| failure("is not readable"))?;
    Ok(())
}

/// One process to run
#[derive(Debug, Clone, Copy)]
pub struct ProcessRequest<'a> {
    /// Program followed by its arguments
    pub argv: &'a [String],
    /// Complete child environment
    pub environment: &'a PropertyMap,
    /// Child working directory
    pub working_directory: &'a Path,
    /// Buffer output instead of streaming it
    pub capture: bool,
    /// Kill the process once this passes
    pub deadline: Option<Deadline>,
}

/// Result of a process that ran to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Exit code, `128 + signal` for signalled processes
    pub exit_code: i32,
    /// Output lines joined with `\n` when capturing
    pub captured: Option<String>,
}

/// Spawns processes and supervises them until exit or deadline
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    grace: Duration,
    groups: Arc<ProcessGroups>,
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ProcessExecutor {
    /// Creates an executor that waits `grace` for a killed process to exit
    #[must_use]
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            groups: Arc::new(ProcessGroups::new()),
        }
    }

    /// Process groups still running
    #[must_use]
    pub fn groups(&self) -> &Arc<ProcessGroups> {
        &self.groups
    }

    /// Runs `request`, handing each streamed line to `on_output`
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::WorkingDirectory`] before spawning
    /// - [`ExecutionError::CommandNotFound`] / [`ExecutionError::Spawn`]
    ///   when the program cannot be started
    /// - [`ExecutionError::StepTimeoutExceeded`] once the deadline passes;
    ///   the process group has been killed by then
    /// - [`ExecutionError::Cancelled`] if the run was cancelled before the
    ///   process started
    pub fn run(
        &self,
        request: &ProcessRequest<'_>,
        on_output: &mut dyn FnMut(&str),
    ) -> Result<ProcessOutcome, ExecutionError> {
        let (program, arguments) =
            request
                .argv
                .split_first()
                .ok_or_else(|| ExecutionError::InvalidCommand {
                    command: String::new(),
                    reason: "no program to run".to_string(),
                })?;
        check_working_directory(request.working_directory)?;
        if self.groups.is_closed() {
            return Err(ExecutionError::Cancelled);
        }

        let (reader, writer) = os_pipe::pipe()?;
        let error_writer = writer.try_clone()?;

        let mut command = Command::new(program);
        command
            .args(arguments)
            .env_clear()
            .envs(request.environment)
            .current_dir(request.working_directory)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(error_writer);
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        tracing::debug!(program = %program, args = ?arguments, "spawning process");
        let child = command.spawn().map_err(|e| spawn_error(program, &e))?;
        // Release our copies of the pipe's write end so EOF arrives when the child exits.
        drop(command);
        let mut guard = ChildGuard::tracked(child, &self.groups);
        tracing::trace!(pid = guard.id(), "process started");

        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || forward_lines(reader, &sender));

        let mut buffer = request.capture.then(CaptureBuffer::default);
        loop {
            if request.deadline.is_some_and(|d| d.is_expired()) {
                return Err(self.expire(&mut guard, request.deadline));
            }
            let received = match request.deadline {
                Some(deadline) => receiver.recv_timeout(deadline.remaining()),
                None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(line) => match buffer.as_mut() {
                    Some(buffer) => buffer.push(line),
                    None => on_output(&line),
                },
                Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(self.expire(&mut guard, request.deadline));
                }
            }
        }

        let Some(status) = guard.wait_until(request.deadline)? else {
            return Err(self.expire(&mut guard, request.deadline));
        };

        let exit_code = exit_code(status);
        tracing::debug!(program = %program, exit_code, "process exited");
        Ok(ProcessOutcome {
            exit_code,
            captured: buffer.map(CaptureBuffer::into_value),
        })
    }

    fn expire(&self, guard: &mut ChildGuard, deadline: Option<Deadline>) -> ExecutionError {
        let minutes = deadline.map_or(0, |d| d.minutes());
        tracing::warn!(pid = guard.id(), minutes, "deadline passed, killing process group");
        if guard.terminate(self.grace).is_none() {
            tracing::error!(pid = guard.id(), "process did not exit after kill");
        }
        ExecutionError::StepTimeoutExceeded { minutes }
    }
}

fn spawn_error(program: &str, err: &io::Error) -> ExecutionError {
    if err.kind() == io::ErrorKind::NotFound {
        ExecutionError::CommandNotFound {
            program: program.to_string(),
        }
    } else {
        ExecutionError::Spawn {
            program: program.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Sends each line of `reader` without its terminator until EOF
fn forward_lines(reader: impl Read, sender: &Sender<String>) {
    let mut reader = BufReader::new(reader);
    let mut bytes = Vec::new();
    loop {
        bytes.clear();
        match reader.read_until(b'\n', &mut bytes) {
            Ok(0) => break,
            Ok(_) => {
                if bytes.ends_with(b"\n") {
                    bytes.pop();
                    if bytes.ends_with(b"\r") {
                        bytes.pop();
                    }
                }
                if sender.send(String::from_utf8_lossy(&bytes).into_owned()).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "output pipe read failed");
                break;
            }
        }
    }
}
