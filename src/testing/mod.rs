//! Testing utilities
//!
//! Test doubles for the front end channel, shared by unit and integration
//! tests. The process-side double lives in [`crate::subprocess::mock`].

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::channel::OutputChannel;

/// Everything observed by a [`RecordingChannel`], in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Stdout(String),
    Stderr(String),
    InputRequested,
}

/// Channel that records output and answers input requests from a script.
///
/// Once the scripted lines run out, further requests fail with
/// `UnexpectedEof` so a test never hangs.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    events: Arc<Mutex<Vec<ChannelEvent>>>,
    inputs: Arc<Mutex<VecDeque<String>>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel that answers input requests with `lines`, in order
    pub fn with_inputs<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let channel = Self::new();
        channel
            .inputs
            .lock()
            .unwrap()
            .extend(lines.into_iter().map(Into::into));
        channel
    }

    pub fn events(&self) -> Vec<ChannelEvent> {
        self.events.lock().unwrap().clone()
    }

    /// All stdout text concatenated
    pub fn stdout(&self) -> String {
        self.collect(|event| match event {
            ChannelEvent::Stdout(text) => Some(text.as_str()),
            _ => None,
        })
    }

    /// All stderr text concatenated
    pub fn stderr(&self) -> String {
        self.collect(|event| match event {
            ChannelEvent::Stderr(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn input_requests(&self) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| **event == ChannelEvent::InputRequested)
            .count()
    }

    fn collect<F>(&self, select: F) -> String
    where
        F: Fn(&ChannelEvent) -> Option<&str>,
    {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(select)
            .collect()
    }

    fn record(&self, event: ChannelEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl OutputChannel for RecordingChannel {
    fn emit_stdout(&self, text: &str) {
        self.record(ChannelEvent::Stdout(text.to_string()));
    }

    fn emit_stderr(&self, text: &str) {
        self.record(ChannelEvent::Stderr(text.to_string()));
    }

    async fn request_input(&self) -> std::io::Result<String> {
        self.record(ChannelEvent::InputRequested);
        self.inputs.lock().unwrap().pop_front().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no scripted input left",
            )
        })
    }
}
