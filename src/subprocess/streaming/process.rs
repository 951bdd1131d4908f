//! Child process with background output readers

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::pump::OutputPump;
use super::types::{StreamSource, READER_GRACE_PERIOD, READ_CHUNK_SIZE};
use crate::channel::OutputChannel;
use crate::subprocess::runner::{ExitStatus, ProcessCommand, ProcessState, StreamingProcess};
use crate::subprocess::ProcessError;

/// A spawned command whose stdout and stderr are read by two background
/// tasks into queues drained by [`StreamingProcess::flush`].
pub struct TokioStreamingProcess {
    command_line: String,
    child: Child,
    pump: OutputPump,
    readers: Vec<JoinHandle<()>>,
    status: Option<ExitStatus>,
}

impl TokioStreamingProcess {
    pub fn spawn(command: &ProcessCommand, input_marker: &str) -> Result<Self, ProcessError> {
        let command_line = command.to_string();
        tracing::debug!("Spawning streaming process: {}", command_line);

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| map_spawn_error(e, command, &command_line))?;

        let stdin = extract_stream(child.stdin.take(), "stdin")?;
        let stdout = extract_stream(child.stdout.take(), "stdout")?;
        let stderr = extract_stream(child.stderr.take(), "stderr")?;

        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();

        let readers = vec![
            tokio::spawn(read_chunks(stdout, StreamSource::Stdout, stdout_tx)),
            tokio::spawn(read_chunks(stderr, StreamSource::Stderr, stderr_tx)),
        ];

        tracing::trace!("Started process {:?}: {}", child.id(), command_line);

        Ok(Self {
            command_line,
            child,
            pump: OutputPump::new(stdout_rx, stderr_rx, Some(Box::new(stdin)), input_marker),
            readers,
            status: None,
        })
    }

    fn record_exit(&mut self, status: std::process::ExitStatus) -> ExitStatus {
        let status = ExitStatus::from(status);
        tracing::debug!("Process exited with {}: {}", status, self.command_line);
        self.status = Some(status);
        status
    }
}

#[async_trait]
impl StreamingProcess for TokioStreamingProcess {
    fn command_line(&self) -> String {
        self.command_line.clone()
    }

    fn poll(&mut self) -> Result<ProcessState, ProcessError> {
        if let Some(status) = self.status {
            return Ok(ProcessState::Exited(status));
        }

        match self.child.try_wait()? {
            Some(status) => Ok(ProcessState::Exited(self.record_exit(status))),
            None => Ok(ProcessState::Running),
        }
    }

    async fn flush(&mut self, channel: &dyn OutputChannel) -> Result<(), ProcessError> {
        self.pump.flush(channel).await
    }

    async fn wait_for_exit(&mut self) -> Result<ExitStatus, ProcessError> {
        if let Some(status) = self.status {
            return Ok(status);
        }

        let status = self.child.wait().await?;
        Ok(self.record_exit(status))
    }

    async fn kill(&mut self) -> Result<(), ProcessError> {
        if self.status.is_some() {
            return Ok(());
        }

        tracing::warn!("Killing process: {}", self.command_line);
        self.child.kill().await?;
        if let Some(status) = self.child.try_wait()? {
            self.record_exit(status);
        }
        Ok(())
    }

    async fn close(&mut self, channel: &dyn OutputChannel) -> Result<(), ProcessError> {
        self.pump.close_stdin();

        // A descendant that inherited the pipes can keep them open long
        // after the child itself is gone
        let deadline = Instant::now() + READER_GRACE_PERIOD;
        for mut reader in self.readers.drain(..) {
            match tokio::time::timeout_at(deadline, &mut reader).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Output reader task failed: {}", e),
                Err(_) => {
                    tracing::debug!(
                        "Output still held open after {:?}, detaching reader: {}",
                        READER_GRACE_PERIOD,
                        self.command_line
                    );
                    reader.abort();
                }
            }
        }

        self.pump.flush_all(channel).await
    }
}

/// Push chunks read from `stream` onto `queue` until end of stream
async fn read_chunks<R>(mut stream: R, source: StreamSource, queue: UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut buffer).await {
            Ok(0) => break,
            Ok(read) => {
                if queue.send(buffer[..read].to_vec()).is_err() {
                    tracing::trace!("{} queue closed, stopping reader", source);
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", source, e);
                break;
            }
        }
    }

    tracing::trace!("{} reader reached end of stream", source);
}

/// Extract a stream from a child process, converting None to error
fn extract_stream<T>(stream: Option<T>, stream_name: &'static str) -> Result<T, ProcessError> {
    stream.ok_or(ProcessError::Capture(stream_name))
}

fn map_spawn_error(
    error: std::io::Error,
    command: &ProcessCommand,
    command_line: &str,
) -> ProcessError {
    tracing::error!(
        "Failed to spawn '{}': {:?} (kind: {:?})",
        command.program,
        error,
        error.kind()
    );

    if error.kind() == std::io::ErrorKind::NotFound {
        ProcessError::CommandNotFound(command.program.clone())
    } else {
        ProcessError::SpawnFailed {
            command: command_line.to_string(),
            source: error,
        }
    }
}
