//! Dispatcher that spawns real processes.

use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use super::traits::{
    CommandDispatcher, CommandOutput, CommandSpec, DispatchError, bound_timeout, classify,
};

/// How long to wait for pipe readers after the child has exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(1);

/// Runs each command as one child process with piped stdout/stderr.
pub struct ProcessDispatcher {
    /// Interval between exit-status checks.
    poll_interval: Duration,
}

impl ProcessDispatcher {
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_millis(20),
        }
    }
}

impl Default for ProcessDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDispatcher for ProcessDispatcher {
    #[instrument(skip(self, command), fields(command = %command))]
    fn execute(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, DispatchError> {
        let timeout = bound_timeout(timeout);
        let program = command.program.as_str();

        let mut child = Command::new(program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| DispatchError::NotFound {
                program: program.to_string(),
                message: e.to_string(),
            })?;

        let stdout = PipeReader::spawn(child.stdout.take());
        let stderr = PipeReader::spawn(child.stderr.take());

        let start = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if start.elapsed() >= timeout {
                        warn!(timeout_ms = timeout.as_millis() as u64, "Command timed out, killing");
                        let _ = child.kill();
                        let _ = child.wait();
                        stdout.finish();
                        stderr.finish();
                        return Err(DispatchError::Timeout {
                            program: program.to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        });
                    }
                    thread::sleep(self.poll_interval);
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    stdout.finish();
                    stderr.finish();
                    return Err(DispatchError::NonZeroExit {
                        program: program.to_string(),
                        code: -1,
                        stderr_tail: e.to_string(),
                    });
                }
            }
        };

        let output = CommandOutput {
            stdout: stdout.finish(),
            stderr: stderr.finish(),
            // Killed by a signal: no code
            exit_code: status.code().unwrap_or(-1),
        };

        debug!(
            exit_code = output.exit_code,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Command finished"
        );

        classify(program, output)
    }
}

/// Drains one pipe on its own thread so a chatty child never blocks on a full buffer.
struct PipeReader {
    output: mpsc::Receiver<String>,
    thread: Option<JoinHandle<()>>,
}

impl PipeReader {
    fn spawn<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
        let (sender, output) = mpsc::channel();
        let thread = pipe.map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                let _ = sender.send(String::from_utf8_lossy(&buf).into_owned());
            })
        });
        Self { output, thread }
    }

    /// Wait up to [`PIPE_DRAIN_GRACE`] and join the reader.
    ///
    /// A daemonized grandchild (the adb server) can inherit the pipe and keep it
    /// open. Its reader stays blocked until that process exits and is detached.
    fn finish(self) -> String {
        match self.output.recv_timeout(PIPE_DRAIN_GRACE) {
            Ok(text) => {
                if let Some(thread) = self.thread {
                    let _ = thread.join();
                }
                text
            }
            Err(_) => {
                if self.thread.as_ref().is_some_and(|t| !t.is_finished()) {
                    debug!("Pipe still held open after exit, detaching reader");
                }
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_missing_binary_is_not_found() {
        let dispatcher = ProcessDispatcher::new();
        let cmd = CommandSpec::new("definitely-not-a-real-transport-tool", ["devices"]);
        let err = dispatcher
            .execute(&cmd, Duration::from_secs(1))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportNotFound);
    }

    /// A pipe whose writer never closes until the test says so.
    struct HeldPipe(mpsc::Receiver<()>);

    impl Read for HeldPipe {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            let _ = self.0.recv();
            Ok(0)
        }
    }

    #[test]
    fn test_pipe_reader_joins_finished_reader() {
        let reader = PipeReader::spawn(Some(std::io::Cursor::new(b"R58M123ABC\tdevice".to_vec())));
        assert_eq!(reader.finish(), "R58M123ABC\tdevice");
    }

    #[test]
    fn test_pipe_reader_held_open_is_bounded() {
        let (release, held) = mpsc::channel();
        let reader = PipeReader::spawn(Some(HeldPipe(held)));

        let start = Instant::now();
        assert_eq!(reader.finish(), "");
        assert!(start.elapsed() < PIPE_DRAIN_GRACE + Duration::from_secs(2));
        release.send(()).unwrap();
    }

    #[test]
    fn test_pipe_reader_without_pipe() {
        assert_eq!(PipeReader::spawn(None::<std::io::Empty>).finish(), "");
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_stdout() {
        let dispatcher = ProcessDispatcher::new();
        let cmd = CommandSpec::new("sh", ["-c", "echo 'List of devices attached'"]);
        let out = dispatcher.execute(&cmd, Duration::from_secs(5)).unwrap();
        assert_eq!(out.exit_code, 0);
        assert!(out.stdout.contains("List of devices attached"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_child() {
        let dispatcher = ProcessDispatcher::new();
        let cmd = CommandSpec::new("sleep", ["5"]);
        let start = Instant::now();
        let err = dispatcher
            .execute(&cmd, Duration::from_millis(200))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandTimeout);
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit() {
        let dispatcher = ProcessDispatcher::new();
        let cmd = CommandSpec::new("sh", ["-c", "echo boom >&2; exit 3"]);
        let err = dispatcher.execute(&cmd, Duration::from_secs(5)).unwrap_err();
        assert_eq!(
            err,
            DispatchError::NonZeroExit {
                program: "sh".into(),
                code: 3,
                stderr_tail: "boom".into(),
            }
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_disconnect_pattern() {
        let dispatcher = ProcessDispatcher::new();
        let cmd = CommandSpec::new(
            "sh",
            ["-c", "echo 'error: no devices/emulators found' >&2; exit 1"],
        );
        let err = dispatcher.execute(&cmd, Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportDisconnected);
    }
}
