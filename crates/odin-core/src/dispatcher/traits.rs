//! Command dispatcher abstraction.
//!
//! Defines the `CommandDispatcher` trait for running external transport
//! tools (adb, fastboot, odin4), allowing different implementations
//! (real processes, scripted mock).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::error::ErrorKind;

/// Lower bound applied to every dispatch timeout.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(10);
/// Upper bound applied to every dispatch timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);
/// Default timeout for query commands (device listings).
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Lines of stderr kept in failure messages.
const TAIL_LINES: usize = 5;

/// stderr/stdout fragments meaning the device went away under the command.
const DISCONNECT_PATTERNS: &[&str] = &[
    "no devices/emulators found",
    "device offline",
    "device not found",
    "error: closed",
    "protocol fault",
    "no_device",
    "device disconnected",
    "failed to open device",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("{program} could not be started: {message}")]
    NotFound { program: String, message: String },

    #[error("{program} timed out after {timeout_ms}ms")]
    Timeout { program: String, timeout_ms: u64 },

    #[error("{program} exited with code {code}: {stderr_tail}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr_tail: String,
    },

    #[error("{program} lost the device: {stderr_tail}")]
    TransportDisconnected { program: String, stderr_tail: String },
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::NotFound { .. } => ErrorKind::TransportNotFound,
            DispatchError::Timeout { .. } => ErrorKind::CommandTimeout,
            DispatchError::NonZeroExit { .. } => ErrorKind::CommandFailed,
            DispatchError::TransportDisconnected { .. } => ErrorKind::TransportDisconnected,
        }
    }
}

/// A program plus its argument list. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Last few stderr lines, falling back to stdout when stderr is empty.
    pub fn stderr_tail(&self) -> String {
        let source = if self.stderr.trim().is_empty() {
            &self.stdout
        } else {
            &self.stderr
        };
        tail(source, TAIL_LINES)
    }

    /// Case-insensitive search across both streams.
    pub fn mentions(&self, pattern: &str) -> bool {
        let pattern = pattern.to_lowercase();
        self.stderr.to_lowercase().contains(&pattern)
            || self.stdout.to_lowercase().contains(&pattern)
    }
}

/// Abstract command runner.
///
/// This trait enables:
/// - Production implementation spawning real processes
/// - Mock implementation for unit testing
pub trait CommandDispatcher: Send + Sync {
    /// Run `command`, waiting at most `timeout`.
    fn execute(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, DispatchError>;
}

/// Clamp a requested timeout into the supported range.
pub fn bound_timeout(timeout: Duration) -> Duration {
    timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT)
}

/// Turn a finished command into success or a classified failure.
pub fn classify(program: &str, output: CommandOutput) -> Result<CommandOutput, DispatchError> {
    if output.exit_code == 0 {
        return Ok(output);
    }

    if DISCONNECT_PATTERNS.iter().any(|p| output.mentions(p)) || names_missing_device(&output) {
        return Err(DispatchError::TransportDisconnected {
            program: program.to_string(),
            stderr_tail: output.stderr_tail(),
        });
    }

    Err(DispatchError::NonZeroExit {
        program: program.to_string(),
        code: output.exit_code,
        stderr_tail: output.stderr_tail(),
    })
}

/// adb's serial-scoped form: `adb: device 'R58M123ABC' not found`.
fn names_missing_device(output: &CommandOutput) -> bool {
    [&output.stderr, &output.stdout].iter().any(|stream| {
        stream.lines().any(|line| {
            let line = line.to_lowercase();
            line.find("device '")
                .is_some_and(|at| line[at + "device '".len()..].contains("' not found"))
        })
    })
}

fn tail(text: &str, lines: usize) -> String {
    let kept: Vec<&str> = text
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .collect();
    let start = kept.len().saturating_sub(lines);
    kept[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(stderr: &str, code: i32) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: code,
        }
    }

    #[test]
    fn test_classify_success() {
        let out = classify("adb", CommandOutput::success("ok")).unwrap();
        assert_eq!(out.stdout, "ok");
    }

    #[test]
    fn test_classify_disconnect() {
        let err = classify("adb", failed("error: no devices/emulators found\n", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportDisconnected);

        let err = classify("adb", failed("adb: device 'R58M123ABC' not found\n", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportDisconnected);

        let err = classify("adb", failed("error: device 'R58M123ABC' not found\n", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportDisconnected);
    }

    #[test]
    fn test_quoted_text_alone_is_not_a_disconnect() {
        let err = classify("adb", failed("adb: file 'update.zip' not found\n", 1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandFailed);
    }

    #[test]
    fn test_classify_non_zero() {
        let err = classify("odin4", failed("FAIL! (Auth)\n", 2)).unwrap_err();
        match err {
            DispatchError::NonZeroExit {
                code, stderr_tail, ..
            } => {
                assert_eq!(code, 2);
                assert_eq!(stderr_tail, "FAIL! (Auth)");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let out = failed("1\n2\n3\n4\n5\n6\n7\n", 1);
        assert_eq!(out.stderr_tail(), "3\n4\n5\n6\n7");
    }

    #[test]
    fn test_bound_timeout() {
        assert_eq!(bound_timeout(Duration::ZERO), MIN_TIMEOUT);
        assert_eq!(bound_timeout(Duration::from_secs(u64::MAX)), MAX_TIMEOUT);
        assert_eq!(
            bound_timeout(DEFAULT_QUERY_TIMEOUT),
            DEFAULT_QUERY_TIMEOUT
        );
    }

    #[test]
    fn test_command_display() {
        let cmd = CommandSpec::new("adb", ["reboot", "recovery"]);
        assert_eq!(cmd.to_string(), "adb reboot recovery");
    }
}
