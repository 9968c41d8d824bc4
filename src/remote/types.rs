//! Command runner abstraction and the streaming process runner.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader};
use std::process::{Child, Command, Stdio};

use tracing::{debug, info};

use super::RemoteError;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Standard output and standard error, interleaved as produced.
    pub output: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing merged output.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Spawn`] if the command cannot be started.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError>;
}

/// Runner that merges stdout and stderr into one pipe, forwards every line
/// to the log as it arrives, and keeps a copy for the caller.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamingCommandRunner;

impl CommandRunner for StreamingCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RemoteError> {
        let spawn_error = |err: io::Error| RemoteError::Spawn {
            program: program.to_owned(),
            message: err.to_string(),
        };

        let (reader, writer) = io::pipe().map_err(spawn_error)?;
        let mut child = {
            // The command owns both writer ends; it must drop before reading
            // so the pipe reports EOF once the child exits.
            let stderr_writer = writer.try_clone().map_err(spawn_error)?;
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(writer)
                .stderr(stderr_writer)
                .spawn()
                .map_err(spawn_error)?
        };

        let output = match forward_lines(BufReader::new(reader)) {
            Ok(output) => output,
            Err(err) => {
                reap(&mut child);
                return Err(spawn_error(err));
            }
        };
        let status = child.wait().map_err(spawn_error)?;

        Ok(CommandOutput {
            code: status.code(),
            output,
        })
    }
}

fn forward_lines(mut reader: impl BufRead) -> io::Result<String> {
    let mut output = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(output);
        }
        let text = String::from_utf8_lossy(&line);
        info!(target: "vmtest::remote", "{}", text.trim_end_matches(['\r', '\n']));
        output.push_str(&text);
    }
}

fn reap(child: &mut Child) {
    // The read failure is the error worth reporting.
    if let Err(err) = child.kill().and_then(|()| child.wait().map(drop)) {
        debug!(error = %err, "failed to reap child after read error");
    }
}
