//! Output channel towards the front end
//!
//! The front end renders streamed subprocess output and answers input
//! requests from the running program. The harness only needs these three
//! capabilities, so everything it reports goes through [`OutputChannel`].

use async_trait::async_trait;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;

#[async_trait]
pub trait OutputChannel: Send + Sync {
    /// Forward program (or toolchain) standard output
    fn emit_stdout(&self, text: &str);

    /// Forward standard error and harness diagnostics
    fn emit_stderr(&self, text: &str);

    /// Ask the user for one line of input.
    ///
    /// Blocks the caller until a line is supplied. The returned line carries
    /// no trailing newline.
    async fn request_input(&self) -> std::io::Result<String>;
}

/// Channel bound to the terminal the harness runs in
pub struct ConsoleChannel {
    input: Mutex<BufReader<tokio::io::Stdin>>,
    prompt: String,
}

impl ConsoleChannel {
    pub fn new() -> Self {
        Self {
            input: Mutex::new(BufReader::new(tokio::io::stdin())),
            prompt: "input> ".to_string(),
        }
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutputChannel for ConsoleChannel {
    fn emit_stdout(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()) {
            tracing::warn!("Failed to write to stdout: {}", e);
        }
    }

    fn emit_stderr(&self, text: &str) {
        let mut stderr = std::io::stderr().lock();
        if let Err(e) = stderr.write_all(text.as_bytes()).and_then(|_| stderr.flush()) {
            tracing::warn!("Failed to write to stderr: {}", e);
        }
    }

    async fn request_input(&self) -> std::io::Result<String> {
        self.emit_stderr(&self.prompt);

        let mut line = String::new();
        let read = self.input.lock().await.read_line(&mut line).await?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stdin closed while the program was waiting for input",
            ));
        }

        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Prefix for harness diagnostics on the error channel
pub const DIAGNOSTIC_PREFIX: &str = "[ASM kernel]";

/// Report a harness message on the error channel
pub fn emit_diagnostic(channel: &dyn OutputChannel, message: impl std::fmt::Display) {
    channel.emit_stderr(&format!("{DIAGNOSTIC_PREFIX} {message}\n"));
}
