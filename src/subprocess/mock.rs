use async_trait::async_trait;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;

use super::error::ProcessError;
use super::runner::{ExitStatus, ProcessCommand, ProcessSpawner, ProcessState, StreamingProcess};
use super::streaming::{OutputPump, DEFAULT_INPUT_MARKER};
use crate::channel::OutputChannel;

/// Spawner that replays scripted output instead of running anything.
///
/// Every spawn is recorded, so tests can assert which pipeline stages ran.
#[derive(Clone)]
pub struct MockProcessSpawner {
    expectations: Arc<Mutex<Vec<MockExpectation>>>,
    call_history: Arc<Mutex<Vec<ProcessCommand>>>,
    stdin_log: Arc<Mutex<Vec<u8>>>,
    input_marker: String,
}

#[derive(Clone)]
enum MockResponse {
    Run {
        stdout: Vec<Vec<u8>>,
        stderr: Vec<Vec<u8>>,
        status: ExitStatus,
        polls_until_exit: usize,
    },
    SpawnFails,
}

struct MockExpectation {
    program: String,
    #[allow(clippy::type_complexity)]
    args_matcher: Option<Box<dyn Fn(&[String]) -> bool + Send + Sync>>,
    response: MockResponse,
    times_called: usize,
    expected_times: Option<usize>,
}

pub struct MockCommandConfig {
    runner: MockProcessSpawner,
    expectation: MockExpectation,
}

impl MockProcessSpawner {
    pub fn new() -> Self {
        Self {
            expectations: Arc::new(Mutex::new(Vec::new())),
            call_history: Arc::new(Mutex::new(Vec::new())),
            stdin_log: Arc::new(Mutex::new(Vec::new())),
            input_marker: DEFAULT_INPUT_MARKER.to_string(),
        }
    }

    /// Expect a spawn of `program`. Programs are matched exactly, so for the
    /// execute stage pass the binary path or use [`Self::expect_any`].
    pub fn expect_command(&mut self, program: &str) -> MockCommandConfig {
        MockCommandConfig {
            runner: self.clone(),
            expectation: MockExpectation {
                program: program.to_string(),
                args_matcher: None,
                response: MockResponse::Run {
                    stdout: Vec::new(),
                    stderr: Vec::new(),
                    status: ExitStatus::Success,
                    polls_until_exit: 0,
                },
                times_called: 0,
                expected_times: None,
            },
        }
    }

    /// Expect a spawn of any program not matched by an earlier expectation
    pub fn expect_any(&mut self) -> MockCommandConfig {
        self.expect_command("*")
    }

    pub fn verify_called(&self, program: &str, times: usize) -> bool {
        let history = self.call_history.lock().unwrap();
        let count = history.iter().filter(|cmd| cmd.program == program).count();
        count == times
    }

    pub fn spawn_count(&self) -> usize {
        self.call_history.lock().unwrap().len()
    }

    pub fn get_call_history(&self) -> Vec<ProcessCommand> {
        self.call_history.lock().unwrap().clone()
    }

    /// Everything written to the stdin of spawned mock processes
    pub fn written_stdin(&self) -> String {
        String::from_utf8_lossy(&self.stdin_log.lock().unwrap()).into_owned()
    }

    pub fn reset(&mut self) {
        self.expectations.lock().unwrap().clear();
        self.call_history.lock().unwrap().clear();
        self.stdin_log.lock().unwrap().clear();
    }

    fn build_process(
        &self,
        command: &ProcessCommand,
        response: MockResponse,
    ) -> Result<Box<dyn StreamingProcess>, ProcessError> {
        let MockResponse::Run {
            stdout,
            stderr,
            status,
            polls_until_exit,
        } = response
        else {
            return Err(ProcessError::CommandNotFound(command.program.clone()));
        };

        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
        for chunk in stdout {
            let _ = stdout_tx.send(chunk);
        }
        for chunk in stderr {
            let _ = stderr_tx.send(chunk);
        }

        let stdin = CapturedInput {
            log: Arc::clone(&self.stdin_log),
        };

        Ok(Box::new(MockStreamingProcess {
            command_line: command.to_string(),
            pump: OutputPump::new(
                stdout_rx,
                stderr_rx,
                Some(Box::new(stdin)),
                &self.input_marker,
            ),
            status,
            polls_until_exit,
            killed: false,
        }))
    }
}

#[async_trait]
impl ProcessSpawner for MockProcessSpawner {
    async fn spawn(
        &self,
        command: ProcessCommand,
    ) -> Result<Box<dyn StreamingProcess>, ProcessError> {
        self.call_history.lock().unwrap().push(command.clone());

        let response = {
            let mut expectations = self.expectations.lock().unwrap();
            let mut found = None;

            for expectation in expectations.iter_mut() {
                if expectation.program != "*" && expectation.program != command.program {
                    continue;
                }

                if let Some(ref args_matcher) = expectation.args_matcher {
                    if !(args_matcher)(&command.args) {
                        continue;
                    }
                }

                expectation.times_called += 1;

                if let Some(expected) = expectation.expected_times {
                    if expectation.times_called > expected {
                        return Err(ProcessError::MockExpectationNotMet(format!(
                            "Command '{}' called {} times, expected {}",
                            command.program, expectation.times_called, expected
                        )));
                    }
                }

                found = Some(expectation.response.clone());
                break;
            }

            found.ok_or_else(|| {
                ProcessError::MockExpectationNotMet(format!(
                    "No expectation found for command: {} {:?}",
                    command.program, command.args
                ))
            })?
        };

        self.build_process(&command, response)
    }
}

impl MockCommandConfig {
    pub fn with_args<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[String]) -> bool + Send + Sync + 'static,
    {
        self.expectation.args_matcher = Some(Box::new(matcher));
        self
    }

    /// Queue one stdout chunk; call repeatedly for several chunks
    pub fn returns_stdout(mut self, chunk: &str) -> Self {
        if let MockResponse::Run { stdout, .. } = &mut self.expectation.response {
            stdout.push(chunk.as_bytes().to_vec());
        }
        self
    }

    pub fn returns_stdout_bytes(mut self, chunk: &[u8]) -> Self {
        if let MockResponse::Run { stdout, .. } = &mut self.expectation.response {
            stdout.push(chunk.to_vec());
        }
        self
    }

    pub fn returns_stderr(mut self, chunk: &str) -> Self {
        if let MockResponse::Run { stderr, .. } = &mut self.expectation.response {
            stderr.push(chunk.as_bytes().to_vec());
        }
        self
    }

    pub fn returns_exit_code(mut self, code: i32) -> Self {
        if let MockResponse::Run { status, .. } = &mut self.expectation.response {
            *status = ExitStatus::from_code(code);
        }
        self
    }

    pub fn returns_success(self) -> Self {
        self.returns_exit_code(0)
    }

    /// Report `Running` for the first `polls` liveness checks
    pub fn runs_for_polls(mut self, polls: usize) -> Self {
        if let MockResponse::Run {
            polls_until_exit, ..
        } = &mut self.expectation.response
        {
            *polls_until_exit = polls;
        }
        self
    }

    /// Make the spawn itself fail as if the program did not exist
    pub fn fails_to_spawn(mut self) -> Self {
        self.expectation.response = MockResponse::SpawnFails;
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.expectation.expected_times = Some(n);
        self
    }

    pub fn finish(self) {
        self.runner
            .expectations
            .lock()
            .unwrap()
            .push(self.expectation);
    }
}

impl Default for MockProcessSpawner {
    fn default() -> Self {
        Self::new()
    }
}

struct MockStreamingProcess {
    command_line: String,
    pump: OutputPump,
    status: ExitStatus,
    polls_until_exit: usize,
    killed: bool,
}

#[async_trait]
impl StreamingProcess for MockStreamingProcess {
    fn command_line(&self) -> String {
        self.command_line.clone()
    }

    fn poll(&mut self) -> Result<ProcessState, ProcessError> {
        if self.killed {
            return Ok(ProcessState::Exited(ExitStatus::Signal(9)));
        }
        if self.polls_until_exit > 0 {
            self.polls_until_exit -= 1;
            return Ok(ProcessState::Running);
        }
        Ok(ProcessState::Exited(self.status))
    }

    async fn flush(&mut self, channel: &dyn OutputChannel) -> Result<(), ProcessError> {
        self.pump.flush(channel).await
    }

    async fn wait_for_exit(&mut self) -> Result<ExitStatus, ProcessError> {
        self.polls_until_exit = 0;
        match self.poll()? {
            ProcessState::Exited(status) => Ok(status),
            ProcessState::Running => Ok(self.status),
        }
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        self.killed = true;
        Ok(())
    }

    async fn close(&mut self, channel: &dyn OutputChannel) -> Result<(), ProcessError> {
        self.pump.close_stdin();
        self.pump.flush_all(channel).await
    }
}

/// Stdin replacement that appends everything written to a shared log
struct CapturedInput {
    log: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for CapturedInput {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.log.lock() {
            Ok(mut log) => {
                log.extend_from_slice(buf);
                Poll::Ready(Ok(buf.len()))
            }
            Err(_) => Poll::Ready(Err(io::Error::other("stdin log poisoned"))),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
