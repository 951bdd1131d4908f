//! Draining of queued subprocess output towards an [`OutputChannel`]

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::channel::OutputChannel;
use crate::subprocess::ProcessError;

pub type InputSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Forwards queued output chunks and answers input requests.
///
/// Chunks arrive from the background readers through unbounded channels. A
/// flush takes a snapshot of what is queued and never waits for more, except
/// while the front end is asked for a line of input.
pub struct OutputPump {
    stdout_rx: UnboundedReceiver<Vec<u8>>,
    stderr_rx: UnboundedReceiver<Vec<u8>>,
    stdin: Option<InputSink>,
    marker: Vec<u8>,
    stdout_pending: Vec<u8>,
    stderr_pending: Vec<u8>,
}

impl OutputPump {
    pub fn new(
        stdout_rx: UnboundedReceiver<Vec<u8>>,
        stderr_rx: UnboundedReceiver<Vec<u8>>,
        stdin: Option<InputSink>,
        marker: &str,
    ) -> Self {
        Self {
            stdout_rx,
            stderr_rx,
            stdin,
            marker: marker.as_bytes().to_vec(),
            stdout_pending: Vec::new(),
            stderr_pending: Vec::new(),
        }
    }

    /// Forward what is queued now, holding back fragments that may be
    /// completed by the next chunk.
    pub async fn flush(&mut self, channel: &dyn OutputChannel) -> Result<(), ProcessError> {
        self.pump(channel, false).await
    }

    /// Forward everything, including held-back fragments. Used once the
    /// readers have reached end of stream.
    pub async fn flush_all(&mut self, channel: &dyn OutputChannel) -> Result<(), ProcessError> {
        self.pump(channel, true).await
    }

    /// Drop the write end of the child's stdin
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    async fn pump(
        &mut self,
        channel: &dyn OutputChannel,
        at_eof: bool,
    ) -> Result<(), ProcessError> {
        drain_queue(&mut self.stderr_rx, &mut self.stderr_pending);
        drain_queue(&mut self.stdout_rx, &mut self.stdout_pending);

        self.forward_stderr(channel, at_eof);
        self.forward_stdout(channel, at_eof).await
    }

    fn forward_stderr(&mut self, channel: &dyn OutputChannel, at_eof: bool) {
        let keep = if at_eof {
            0
        } else {
            incomplete_utf8_tail(&self.stderr_pending)
        };
        let ready = take_ready(&mut self.stderr_pending, keep);
        if !ready.is_empty() {
            channel.emit_stderr(&decode_escaped(&ready));
        }
    }

    async fn forward_stdout(
        &mut self,
        channel: &dyn OutputChannel,
        at_eof: bool,
    ) -> Result<(), ProcessError> {
        while let Some(position) = find_marker(&self.stdout_pending, &self.marker) {
            let rest = self.stdout_pending.split_off(position + self.marker.len());
            self.stdout_pending.truncate(position);

            let prompt = std::mem::replace(&mut self.stdout_pending, rest);
            if !prompt.is_empty() {
                channel.emit_stdout(&decode_escaped(&prompt));
            }

            self.answer_input_request(channel).await?;
        }

        let keep = if at_eof {
            0
        } else {
            incomplete_utf8_tail(&self.stdout_pending)
                .max(partial_marker_tail(&self.stdout_pending, &self.marker))
        };
        let ready = take_ready(&mut self.stdout_pending, keep);
        if !ready.is_empty() {
            channel.emit_stdout(&decode_escaped(&ready));
        }

        Ok(())
    }

    async fn answer_input_request(
        &mut self,
        channel: &dyn OutputChannel,
    ) -> Result<(), ProcessError> {
        tracing::debug!("Program requested input");

        let mut line = String::new();
        while line.is_empty() {
            line = channel.request_input().await.map_err(ProcessError::Input)?;
        }
        // The front end strips the newline the program expects
        line.push('\n');

        let Some(stdin) = self.stdin.as_mut() else {
            tracing::warn!("Input requested but the process stdin is closed");
            return Ok(());
        };

        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        match written {
            Ok(()) => {
                tracing::trace!("Wrote {} bytes of input", line.len());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                tracing::warn!("Process closed stdin before input was delivered");
                self.stdin = None;
                Ok(())
            }
            Err(e) => Err(ProcessError::Io(e)),
        }
    }
}

fn drain_queue(queue: &mut UnboundedReceiver<Vec<u8>>, pending: &mut Vec<u8>) {
    while let Ok(chunk) = queue.try_recv() {
        pending.extend_from_slice(&chunk);
    }
}

/// Split off everything but the last `keep` bytes
fn take_ready(pending: &mut Vec<u8>, keep: usize) -> Vec<u8> {
    let held = pending.split_off(pending.len() - keep.min(pending.len()));
    std::mem::replace(pending, held)
}

fn find_marker(haystack: &[u8], marker: &[u8]) -> Option<usize> {
    if marker.is_empty() || haystack.len() < marker.len() {
        return None;
    }
    haystack
        .windows(marker.len())
        .position(|window| window == marker)
}

/// Length of the longest suffix of `bytes` that is a proper prefix of `marker`
fn partial_marker_tail(bytes: &[u8], marker: &[u8]) -> usize {
    (1..marker.len())
        .rev()
        .find(|&len| bytes.ends_with(&marker[..len]))
        .unwrap_or(0)
}

/// Length of a truncated multi-byte UTF-8 sequence at the end of `bytes`
fn incomplete_utf8_tail(bytes: &[u8]) -> usize {
    let len = bytes.len();
    for start in (len.saturating_sub(3)..len).rev() {
        let byte = bytes[start];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let expected = match byte {
            0xF0..=0xF7 => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        let available = len - start;
        return if expected > available { available } else { 0 };
    }
    0
}

/// Decode as UTF-8, rendering invalid bytes as `\xNN` escapes
pub fn decode_escaped(bytes: &[u8]) -> String {
    let mut decoded = String::with_capacity(bytes.len());
    let mut rest = bytes;

    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                decoded.push_str(valid);
                return decoded;
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                if let Ok(valid) = std::str::from_utf8(valid) {
                    decoded.push_str(valid);
                }
                let invalid = err.error_len().unwrap_or(after.len());
                for byte in &after[..invalid] {
                    decoded.push_str(&format!("\\x{byte:02x}"));
                }
                rest = &after[invalid..];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_escaped_valid_text() {
        assert_eq!(decode_escaped("héllo".as_bytes()), "héllo");
    }

    #[test]
    fn test_decode_escaped_invalid_bytes() {
        assert_eq!(decode_escaped(b"ok\xff\xfe!"), "ok\\xff\\xfe!");
        assert_eq!(decode_escaped(b"\xc3"), "\\xc3");
        assert_eq!(decode_escaped(b"caf\xc3\xa9 \x80\xc3"), "café \\x80\\xc3");
    }

    #[test]
    fn test_partial_marker_tail() {
        let marker = b"<inputRequest>";
        assert_eq!(partial_marker_tail(b"hello <input", marker), 6);
        assert_eq!(partial_marker_tail(b"a < b", marker), 0);
        assert_eq!(partial_marker_tail(b"<", marker), 1);
        assert_eq!(partial_marker_tail(b"", marker), 0);
    }

    #[test]
    fn test_incomplete_utf8_tail() {
        let euro = "€".as_bytes();
        assert_eq!(incomplete_utf8_tail(&euro[..2]), 2);
        assert_eq!(incomplete_utf8_tail(euro), 0);
        assert_eq!(incomplete_utf8_tail(b"plain"), 0);
        assert_eq!(incomplete_utf8_tail(b""), 0);
    }

    #[test]
    fn test_take_ready_keeps_tail() {
        let mut pending = b"abcdef".to_vec();
        assert_eq!(take_ready(&mut pending, 2), b"abcd".to_vec());
        assert_eq!(pending, b"ef".to_vec());

        assert_eq!(take_ready(&mut pending, 10), Vec::<u8>::new());
        assert_eq!(pending, b"ef".to_vec());
    }
}
