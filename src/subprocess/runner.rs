use async_trait::async_trait;
use std::fmt;

use super::error::ProcessError;
use super::streaming::TokioStreamingProcess;
use crate::channel::OutputChannel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessCommand {
    /// Full argument vector, program first
    pub fn argv(&self) -> Vec<&str> {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for ProcessCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&shell_words::join(self.argv()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Error(i32),
    Signal(i32),
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Success)
    }

    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Success => Some(0),
            ExitStatus::Error(code) => Some(*code),
            ExitStatus::Signal(_) => None,
        }
    }

    /// Build from a raw exit code as reported by a finished process
    pub fn from_code(code: i32) -> Self {
        if code == 0 {
            ExitStatus::Success
        } else {
            ExitStatus::Error(code)
        }
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        if status.success() {
            return ExitStatus::Success;
        }
        if let Some(code) = status.code() {
            return ExitStatus::Error(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitStatus::Signal(signal);
            }
        }

        ExitStatus::Error(1)
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Success => write!(f, "code 0"),
            ExitStatus::Error(code) => write!(f, "code {code}"),
            ExitStatus::Signal(signal) => write!(f, "signal {signal}"),
        }
    }
}

/// Liveness of a streaming process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited(ExitStatus),
}

/// A live external command whose output is buffered in the background.
///
/// `flush` forwards whatever output is queued right now and returns; it only
/// suspends when the program asks for interactive input.
#[async_trait]
pub trait StreamingProcess: Send {
    /// Command line the process was started with, for diagnostics
    fn command_line(&self) -> String;

    /// Non-blocking liveness check
    fn poll(&mut self) -> Result<ProcessState, ProcessError>;

    /// Forward all currently queued output to `channel`
    async fn flush(&mut self, channel: &dyn OutputChannel) -> Result<(), ProcessError>;

    /// Block until the process terminates. Queued output is kept.
    async fn wait_for_exit(&mut self) -> Result<ExitStatus, ProcessError>;

    /// Terminate the process
    async fn kill(&mut self) -> Result<(), ProcessError>;

    /// Wait for the background readers to reach end of stream and forward
    /// everything that is left, including partially received fragments.
    async fn close(&mut self, channel: &dyn OutputChannel) -> Result<(), ProcessError>;
}

#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(
        &self,
        command: ProcessCommand,
    ) -> Result<Box<dyn StreamingProcess>, ProcessError>;
}

/// Spawns real child processes through tokio
pub struct TokioProcessSpawner {
    input_marker: String,
}

impl TokioProcessSpawner {
    pub fn new(input_marker: impl Into<String>) -> Self {
        Self {
            input_marker: input_marker.into(),
        }
    }
}

impl Default for TokioProcessSpawner {
    fn default() -> Self {
        Self::new(super::streaming::DEFAULT_INPUT_MARKER)
    }
}

#[async_trait]
impl ProcessSpawner for TokioProcessSpawner {
    async fn spawn(
        &self,
        command: ProcessCommand,
    ) -> Result<Box<dyn StreamingProcess>, ProcessError> {
        let process = TokioStreamingProcess::spawn(&command, &self.input_marker)?;
        Ok(Box::new(process))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display_quotes_arguments() {
        let command = ProcessCommand {
            program: "/tmp/work dir/source.run".to_string(),
            args: vec!["a b".to_string(), "c".to_string()],
        };
        assert_eq!(command.to_string(), "'/tmp/work dir/source.run' 'a b' c");
    }

    #[test]
    fn test_exit_status_from_code() {
        assert_eq!(ExitStatus::from_code(0), ExitStatus::Success);
        assert_eq!(ExitStatus::from_code(3), ExitStatus::Error(3));
        assert_eq!(ExitStatus::Error(3).code(), Some(3));
        assert_eq!(ExitStatus::Signal(9).code(), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_convert_std_exit_status() {
        use std::os::unix::process::ExitStatusExt;

        let status = std::process::ExitStatus::from_raw(0);
        assert_eq!(ExitStatus::from(status), ExitStatus::Success);

        // Exit code 1
        let status = std::process::ExitStatus::from_raw(256);
        assert_eq!(ExitStatus::from(status), ExitStatus::Error(1));

        // Killed by SIGKILL
        let status = std::process::ExitStatus::from_raw(9);
        assert_eq!(ExitStatus::from(status), ExitStatus::Signal(9));
    }

    #[test]
    fn test_exit_status_display() {
        assert_eq!(ExitStatus::Error(2).to_string(), "code 2");
        assert_eq!(ExitStatus::Signal(15).to_string(), "signal 15");
    }
}
