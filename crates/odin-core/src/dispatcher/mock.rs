//! Scripted dispatcher for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::traits::{CommandDispatcher, CommandOutput, CommandSpec, DispatchError, classify};

/// Canned reply for one call.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Command ran; goes through the normal exit classification.
    Output(CommandOutput),
    /// Dispatcher-level failure returned as is.
    Fail(DispatchError),
}

impl MockResponse {
    pub fn ok(stdout: &str) -> Self {
        MockResponse::Output(CommandOutput::success(stdout))
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        MockResponse::Output(CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: code,
        })
    }
}

type Hook = Arc<dyn Fn(&CommandSpec) + Send + Sync>;

/// Mock dispatcher for unit testing monitor and orchestrator logic.
pub struct MockDispatcher {
    /// Queued replies per program.
    queues: Mutex<HashMap<String, VecDeque<MockResponse>>>,
    /// Reply used when a program's queue is empty.
    defaults: Mutex<HashMap<String, MockResponse>>,
    /// Captured calls with the timeout each was given.
    call_log: Mutex<Vec<(CommandSpec, Duration)>>,
    /// Whether the device is "attached".
    connected: Mutex<bool>,
    /// Runs before each reply is produced.
    hook: Mutex<Option<Hook>>,
}

impl MockDispatcher {
    pub fn new() -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            defaults: Mutex::new(HashMap::new()),
            call_log: Mutex::new(Vec::new()),
            connected: Mutex::new(true),
            hook: Mutex::new(None),
        }
    }

    /// Queue a reply for the next call to `program`.
    pub fn queue(&self, program: &str, response: MockResponse) {
        lock(&self.queues)
            .entry(program.to_string())
            .or_default()
            .push_back(response);
    }

    /// Reply for `program` once its queue runs dry.
    pub fn set_default(&self, program: &str, response: MockResponse) {
        lock(&self.defaults).insert(program.to_string(), response);
    }

    /// Install a callback invoked on every call, before replying.
    pub fn set_hook(&self, hook: impl Fn(&CommandSpec) + Send + Sync + 'static) {
        *lock(&self.hook) = Some(Arc::new(hook));
    }

    /// Get all captured calls.
    pub fn calls(&self) -> Vec<CommandSpec> {
        lock(&self.call_log)
            .iter()
            .map(|(command, _)| command.clone())
            .collect()
    }

    /// Captured calls paired with the timeout the caller passed.
    pub fn timed_calls(&self) -> Vec<(CommandSpec, Duration)> {
        lock(&self.call_log).clone()
    }

    /// Captured calls to one program.
    pub fn calls_to(&self, program: &str) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.call_log).len()
    }

    /// Simulate the device being unplugged: every call reports a lost transport.
    pub fn disconnect(&self) {
        *lock(&self.connected) = false;
    }

    /// Simulate device reconnect.
    pub fn reconnect(&self) {
        *lock(&self.connected) = true;
    }
}

impl Default for MockDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandDispatcher for MockDispatcher {
    fn execute(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, DispatchError> {
        lock(&self.call_log).push((command.clone(), timeout));

        let hook = lock(&self.hook).clone();
        if let Some(hook) = hook {
            hook(command);
        }

        if !*lock(&self.connected) {
            return Err(DispatchError::TransportDisconnected {
                program: command.program.clone(),
                stderr_tail: "error: device offline".into(),
            });
        }

        let queued = lock(&self.queues)
            .get_mut(&command.program)
            .and_then(VecDeque::pop_front);
        let response = queued
            .or_else(|| lock(&self.defaults).get(&command.program).cloned())
            .unwrap_or_else(|| MockResponse::ok(""));

        match response {
            MockResponse::Output(output) => classify(&command.program, output),
            MockResponse::Fail(err) => Err(err),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_mock_queue_then_default() {
        let mock = MockDispatcher::new();
        mock.queue("adb", MockResponse::ok("first"));
        mock.set_default("adb", MockResponse::ok("fallback"));

        let cmd = CommandSpec::new("adb", ["devices"]);
        let t = Duration::from_secs(1);
        assert_eq!(mock.execute(&cmd, t).unwrap().stdout, "first");
        assert_eq!(mock.execute(&cmd, t).unwrap().stdout, "fallback");
        assert_eq!(mock.execute(&cmd, t).unwrap().stdout, "fallback");
        assert_eq!(mock.call_count(), 3);
    }

    #[test]
    fn test_mock_records_timeouts() {
        let mock = MockDispatcher::new();
        let cmd = CommandSpec::new("adb", ["devices"]);
        mock.execute(&cmd, Duration::from_secs(5)).unwrap();
        mock.execute(&cmd, Duration::from_millis(250)).unwrap();

        assert_eq!(
            mock.timed_calls(),
            vec![
                (cmd.clone(), Duration::from_secs(5)),
                (cmd, Duration::from_millis(250)),
            ]
        );
    }

    #[test]
    fn test_mock_exit_is_classified() {
        let mock = MockDispatcher::new();
        mock.queue("odin4", MockResponse::exit(1, "FAIL!"));

        let cmd = CommandSpec::new("odin4", ["-b", "BL.tar.md5"]);
        let err = mock.execute(&cmd, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CommandFailed);
    }

    #[test]
    fn test_mock_disconnect() {
        let mock = MockDispatcher::new();
        mock.disconnect();

        let cmd = CommandSpec::new("adb", ["devices"]);
        let err = mock.execute(&cmd, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportDisconnected);

        mock.reconnect();
        assert!(mock.execute(&cmd, Duration::from_secs(1)).is_ok());
    }
}
