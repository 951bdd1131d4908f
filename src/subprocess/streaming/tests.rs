use super::*;
use crate::subprocess::runner::{ExitStatus, ProcessState, StreamingProcess};
use crate::subprocess::{ProcessCommandBuilder, ProcessError};
use crate::testing::{ChannelEvent, RecordingChannel};
use std::time::Duration;
use tokio::io::{AsyncReadExt, DuplexStream};
use tokio::sync::mpsc::{self, UnboundedSender};

struct PumpHarness {
    pump: OutputPump,
    stdout: UnboundedSender<Vec<u8>>,
    stderr: UnboundedSender<Vec<u8>>,
    stdin: DuplexStream,
}

fn pump_harness() -> PumpHarness {
    let (stdout_tx, stdout_rx) = mpsc::unbounded_channel();
    let (stderr_tx, stderr_rx) = mpsc::unbounded_channel();
    let (child_stdin, harness_end) = tokio::io::duplex(256);

    PumpHarness {
        pump: OutputPump::new(
            stdout_rx,
            stderr_rx,
            Some(Box::new(child_stdin)),
            DEFAULT_INPUT_MARKER,
        ),
        stdout: stdout_tx,
        stderr: stderr_tx,
        stdin: harness_end,
    }
}

async fn read_stdin(stdin: &mut DuplexStream, len: usize) -> String {
    let mut buffer = vec![0u8; len];
    stdin.read_exact(&mut buffer).await.unwrap();
    String::from_utf8(buffer).unwrap()
}

#[tokio::test]
async fn test_flush_forwards_prompt_before_requesting_input() {
    let mut harness = pump_harness();
    let channel = RecordingChannel::with_inputs(["42"]);

    harness.stdout.send(b"hello<inputRequest>".to_vec()).unwrap();
    harness.pump.flush(&channel).await.unwrap();

    assert_eq!(
        channel.events(),
        vec![
            ChannelEvent::Stdout("hello".to_string()),
            ChannelEvent::InputRequested,
        ]
    );
    assert_eq!(read_stdin(&mut harness.stdin, 3).await, "42\n");
}

#[tokio::test]
async fn test_flush_without_marker_forwards_everything() {
    let mut harness = pump_harness();
    let channel = RecordingChannel::new();

    harness.stdout.send(b"line one\n".to_vec()).unwrap();
    harness.stdout.send(b"line two\n".to_vec()).unwrap();
    harness.pump.flush(&channel).await.unwrap();

    assert_eq!(channel.stdout(), "line one\nline two\n");
    assert_eq!(channel.input_requests(), 0);
}

#[tokio::test]
async fn test_flush_emits_stderr_before_stdout() {
    let mut harness = pump_harness();
    let channel = RecordingChannel::new();

    harness.stdout.send(b"out".to_vec()).unwrap();
    harness.stderr.send(b"err".to_vec()).unwrap();
    harness.pump.flush(&channel).await.unwrap();

    assert_eq!(
        channel.events(),
        vec![
            ChannelEvent::Stderr("err".to_string()),
            ChannelEvent::Stdout("out".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_flush_with_nothing_queued_emits_nothing() {
    let mut harness = pump_harness();
    let channel = RecordingChannel::new();

    harness.pump.flush(&channel).await.unwrap();

    assert!(channel.events().is_empty());
}

#[tokio::test]
async fn test_marker_split_across_chunks() {
    let mut harness = pump_harness();
    let channel = RecordingChannel::with_inputs(["x"]);

    harness.stdout.send(b"abc<inp".to_vec()).unwrap();
    harness.pump.flush(&channel).await.unwrap();
    assert_eq!(channel.stdout(), "abc");
    assert_eq!(channel.input_requests(), 0);

    harness.stdout.send(b"utRequest>tail".to_vec()).unwrap();
    harness.pump.flush(&channel).await.unwrap();

    assert_eq!(
        channel.events(),
        vec![
            ChannelEvent::Stdout("abc".to_string()),
            ChannelEvent::InputRequested,
            ChannelEvent::Stdout("tail".to_string()),
        ]
    );
    assert_eq!(read_stdin(&mut harness.stdin, 2).await, "x\n");
}

#[tokio::test]
async fn test_flush_all_releases_held_fragment() {
    let mut harness = pump_harness();
    let channel = RecordingChannel::new();

    harness.stdout.send(b"a < b <in".to_vec()).unwrap();
    harness.pump.flush(&channel).await.unwrap();
    assert_eq!(channel.stdout(), "a < b ");

    harness.pump.flush_all(&channel).await.unwrap();
    assert_eq!(channel.stdout(), "a < b <in");
}

#[tokio::test]
async fn test_empty_input_lines_are_requested_again() {
    let mut harness = pump_harness();
    let channel = RecordingChannel::with_inputs(["", "", "7"]);

    harness.stdout.send(b"<inputRequest>".to_vec()).unwrap();
    harness.pump.flush(&channel).await.unwrap();

    assert_eq!(channel.input_requests(), 3);
    assert_eq!(channel.stdout(), "");
    assert_eq!(read_stdin(&mut harness.stdin, 2).await, "7\n");
}

#[tokio::test]
async fn test_each_marker_requests_one_line() {
    let mut harness = pump_harness();
    let channel = RecordingChannel::with_inputs(["1", "2"]);

    harness
        .stdout
        .send(b"a? <inputRequest>b? <inputRequest>".to_vec())
        .unwrap();
    harness.pump.flush(&channel).await.unwrap();

    assert_eq!(
        channel.events(),
        vec![
            ChannelEvent::Stdout("a? ".to_string()),
            ChannelEvent::InputRequested,
            ChannelEvent::Stdout("b? ".to_string()),
            ChannelEvent::InputRequested,
        ]
    );
    assert_eq!(read_stdin(&mut harness.stdin, 4).await, "1\n2\n");
}

#[tokio::test]
async fn test_input_failure_is_reported() {
    let mut harness = pump_harness();
    let channel = RecordingChannel::new();

    harness.stdout.send(b"<inputRequest>".to_vec()).unwrap();
    let result = harness.pump.flush(&channel).await;

    assert!(matches!(result, Err(ProcessError::Input(_))));
}

#[tokio::test]
async fn test_split_utf8_sequence_is_reassembled() {
    let mut harness = pump_harness();
    let channel = RecordingChannel::new();
    let euro = "€".as_bytes();

    harness.stdout.send(euro[..2].to_vec()).unwrap();
    harness.pump.flush(&channel).await.unwrap();
    assert!(channel.events().is_empty());

    harness.stdout.send(euro[2..].to_vec()).unwrap();
    harness.pump.flush(&channel).await.unwrap();
    assert_eq!(channel.stdout(), "€");
}

#[tokio::test]
async fn test_invalid_bytes_are_escaped() {
    let mut harness = pump_harness();
    let channel = RecordingChannel::new();

    harness.stderr.send(b"bad \xff byte".to_vec()).unwrap();
    harness.pump.flush_all(&channel).await.unwrap();

    assert_eq!(channel.stderr(), "bad \\xff byte");
}

/// Poll and flush until exit, then drain what is left
async fn drive(process: &mut dyn StreamingProcess, channel: &RecordingChannel) -> ExitStatus {
    loop {
        process.flush(channel).await.unwrap();
        if let ProcessState::Exited(status) = process.poll().unwrap() {
            process.close(channel).await.unwrap();
            return status;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn shell(script: &str) -> crate::subprocess::ProcessCommand {
    ProcessCommandBuilder::new("sh").arg("-c").arg(script).build()
}

#[tokio::test]
async fn test_process_streams_stdout_and_stderr() {
    let channel = RecordingChannel::new();
    let mut process =
        TokioStreamingProcess::spawn(&shell("echo out; echo err >&2"), DEFAULT_INPUT_MARKER)
            .unwrap();

    let status = drive(&mut process, &channel).await;

    assert!(status.success());
    assert_eq!(channel.stdout(), "out\n");
    assert_eq!(channel.stderr(), "err\n");
}

#[tokio::test]
async fn test_process_reports_exit_code() {
    let channel = RecordingChannel::new();
    let mut process =
        TokioStreamingProcess::spawn(&shell("exit 3"), DEFAULT_INPUT_MARKER).unwrap();

    assert_eq!(drive(&mut process, &channel).await, ExitStatus::Error(3));
}

#[tokio::test]
async fn test_process_interactive_input() {
    let channel = RecordingChannel::with_inputs(["", "bob"]);
    let script = r#"printf 'name? <inputRequest>'; read name; echo "hi $name""#;
    let mut process = TokioStreamingProcess::spawn(&shell(script), DEFAULT_INPUT_MARKER).unwrap();

    let status = drive(&mut process, &channel).await;

    assert!(status.success());
    assert_eq!(channel.stdout(), "name? hi bob\n");
    assert_eq!(channel.input_requests(), 2);
}

#[tokio::test]
async fn test_process_large_output_is_not_lost() {
    let channel = RecordingChannel::new();
    let script = "i=0; while [ $i -lt 2000 ]; do echo line$i; i=$((i+1)); done";
    let mut process = TokioStreamingProcess::spawn(&shell(script), DEFAULT_INPUT_MARKER).unwrap();

    drive(&mut process, &channel).await;

    let stdout = channel.stdout();
    assert_eq!(stdout.lines().count(), 2000);
    assert!(stdout.ends_with("line1999\n"));
}

#[tokio::test]
async fn test_close_does_not_wait_for_background_descendant() {
    let channel = RecordingChannel::new();
    let mut process =
        TokioStreamingProcess::spawn(&shell("sleep 5 & echo hi"), DEFAULT_INPUT_MARKER).unwrap();
    let started = std::time::Instant::now();

    let status = drive(&mut process, &channel).await;

    assert!(status.success());
    assert_eq!(channel.stdout(), "hi\n");
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "close blocked for {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_kill_and_close_with_descendant_holding_pipes() {
    let channel = RecordingChannel::new();
    let mut process = TokioStreamingProcess::spawn(
        &shell("echo started; sleep 30 & sleep 30"),
        DEFAULT_INPUT_MARKER,
    )
    .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let started = std::time::Instant::now();

    process.kill().await.unwrap();
    process.close(&channel).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(channel.stdout(), "started\n");
    assert_eq!(
        process.poll().unwrap(),
        ProcessState::Exited(ExitStatus::Signal(9))
    );
}

#[tokio::test]
async fn test_wait_for_exit_keeps_queued_output() {
    let channel = RecordingChannel::new();
    let mut process =
        TokioStreamingProcess::spawn(&shell("echo done"), DEFAULT_INPUT_MARKER).unwrap();

    let status = process.wait_for_exit().await.unwrap();
    process.close(&channel).await.unwrap();

    assert!(status.success());
    assert_eq!(channel.stdout(), "done\n");
    assert_eq!(process.poll().unwrap(), ProcessState::Exited(status));
}

#[tokio::test]
async fn test_kill_terminates_process() {
    let channel = RecordingChannel::new();
    let command = ProcessCommandBuilder::new("sleep").arg("30").build();
    let mut process = TokioStreamingProcess::spawn(&command, DEFAULT_INPUT_MARKER).unwrap();

    assert_eq!(process.poll().unwrap(), ProcessState::Running);
    process.kill().await.unwrap();
    process.close(&channel).await.unwrap();

    assert_eq!(
        process.poll().unwrap(),
        ProcessState::Exited(ExitStatus::Signal(9))
    );
}

#[tokio::test]
async fn test_spawn_missing_program() {
    let command = ProcessCommandBuilder::new("nonexistent-assembler-12345").build();
    let result = TokioStreamingProcess::spawn(&command, DEFAULT_INPUT_MARKER);

    match result {
        Err(ProcessError::CommandNotFound(program)) => {
            assert_eq!(program, "nonexistent-assembler-12345")
        }
        Err(other) => panic!("Expected CommandNotFound, got {other:?}"),
        Ok(_) => panic!("Expected spawn to fail"),
    }
}
