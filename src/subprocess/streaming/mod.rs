//! Real-time streaming infrastructure for subprocess output
//!
//! Each child gets two background reader tasks that move raw output chunks
//! into queues as soon as they are produced, so the child never stalls on a
//! full pipe. The foreground drains the queues on its own cadence and
//! handles the interactive input protocol.

pub mod process;
pub mod pump;
pub mod types;

#[cfg(test)]
mod tests;

pub use process::TokioStreamingProcess;
pub use pump::{decode_escaped, InputSink, OutputPump};
pub use types::{StreamSource, DEFAULT_INPUT_MARKER, READER_GRACE_PERIOD, READ_CHUNK_SIZE};
