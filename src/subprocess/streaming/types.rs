//! Core types for streaming infrastructure

use std::fmt;
use std::time::Duration;

/// Bytes requested from a pipe per read
pub const READ_CHUNK_SIZE: usize = 4096;

/// How long `close` waits for the output readers once the child is gone
pub const READER_GRACE_PERIOD: Duration = Duration::from_millis(250);

/// Token a program prints to ask for a line of input
pub const DEFAULT_INPUT_MARKER: &str = "<inputRequest>";

/// Stream source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamSource::Stdout => f.write_str("stdout"),
            StreamSource::Stderr => f.write_str("stderr"),
        }
    }
}
