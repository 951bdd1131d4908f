//! Compile → link → execute driver

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::state::{PipelineOutcome, PipelineState, Stage};
use super::workspace::Workspace;
use super::PipelineError;
use crate::channel::{emit_diagnostic, OutputChannel};
use crate::directives::BuildConfig;
use crate::subprocess::{
    ExitStatus, ProcessCommand, ProcessCommandBuilder, ProcessSpawner, ProcessState,
};

/// Timing knobs for the stage loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Pause between two poll/flush rounds
    pub poll_interval: Duration,
    /// Kill a stage that keeps running longer than this. Time spent waiting
    /// for interactive input does not count.
    pub stage_timeout: Option<Duration>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            stage_timeout: None,
        }
    }
}

enum StageResult {
    Exited(ExitStatus),
    TimedOut,
}

/// Runs one submission through the toolchain.
///
/// A failing compile never reaches the linker, and a failing link never
/// reaches execution.
pub struct PipelineController {
    spawner: Arc<dyn ProcessSpawner>,
    options: PipelineOptions,
    state: PipelineState,
}

impl PipelineController {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, options: PipelineOptions) -> Self {
        Self {
            spawner,
            options,
            state: PipelineState::Start,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn compile_command(config: &BuildConfig, workspace: &Workspace) -> ProcessCommand {
        ProcessCommandBuilder::new(config.compiler.program())
            .args(&config.cflags)
            .output(workspace.object_path())
            .path_arg(workspace.source_path())
            .build()
    }

    pub fn link_command(config: &BuildConfig, workspace: &Workspace) -> ProcessCommand {
        ProcessCommandBuilder::new(config.linker.program())
            .args(&config.ldflags)
            .output(workspace.binary_path())
            .path_arg(workspace.object_path())
            .build()
    }

    pub fn execute_command(config: &BuildConfig, workspace: &Workspace) -> ProcessCommand {
        ProcessCommandBuilder::from_path(workspace.binary_path())
            .args(&config.args)
            .build()
    }

    /// Write `code` into the workspace and run all three stages
    pub async fn run(
        &mut self,
        config: &BuildConfig,
        code: &str,
        workspace: &Workspace,
        channel: &dyn OutputChannel,
    ) -> Result<PipelineOutcome, PipelineError> {
        workspace
            .write_source(code)
            .map_err(PipelineError::Workspace)?;

        let compile = Self::compile_command(config, workspace);
        if config.verbose {
            emit_diagnostic(channel, format_args!("Compiling with:  {compile}"));
        }
        match self.run_stage(Stage::Compile, compile, channel).await? {
            StageResult::Exited(status) if !status.success() => {
                emit_diagnostic(
                    channel,
                    format_args!(
                        "{} exited with {status}, the executable will not be executed",
                        config.compiler
                    ),
                );
                self.transition(PipelineState::Failed);
                return Ok(PipelineOutcome::CompileFailed { status });
            }
            StageResult::Exited(_) => {}
            StageResult::TimedOut => return Ok(self.timed_out(Stage::Compile, channel)),
        }

        let link = Self::link_command(config, workspace);
        if config.verbose {
            emit_diagnostic(channel, format_args!("Linking with:    {link}"));
        }
        match self.run_stage(Stage::Link, link, channel).await? {
            StageResult::Exited(status) if !status.success() => {
                emit_diagnostic(
                    channel,
                    format_args!(
                        "{} (linker) exited with {status}, the executable will not be executed",
                        config.linker
                    ),
                );
                self.transition(PipelineState::Failed);
                return Ok(PipelineOutcome::LinkFailed { status });
            }
            StageResult::Exited(_) => {}
            StageResult::TimedOut => return Ok(self.timed_out(Stage::Link, channel)),
        }

        let execute = Self::execute_command(config, workspace);
        if config.verbose {
            emit_diagnostic(channel, format_args!("Executing with:  {execute}"));
        }
        let exit_status = match self.run_stage(Stage::Execute, execute, channel).await? {
            StageResult::Exited(status) => status,
            StageResult::TimedOut => return Ok(self.timed_out(Stage::Execute, channel)),
        };
        if config.verbose {
            emit_diagnostic(channel, format_args!("Executable exited with {exit_status}"));
        }

        self.transition(PipelineState::Done);
        Ok(PipelineOutcome::Completed { exit_status })
    }

    /// Spawn one stage and pump its output until it exits
    async fn run_stage(
        &mut self,
        stage: Stage,
        command: ProcessCommand,
        channel: &dyn OutputChannel,
    ) -> Result<StageResult, PipelineError> {
        self.transition(stage.state());

        let mut process = self.spawner.spawn(command).await?;
        let mut running_for = Duration::ZERO;

        loop {
            process.flush(channel).await?;

            if let ProcessState::Exited(status) = process.poll()? {
                process.close(channel).await?;
                tracing::debug!("{} stage exited with {}", stage, status);
                return Ok(StageResult::Exited(status));
            }

            if let Some(limit) = self.options.stage_timeout {
                if running_for >= limit {
                    tracing::warn!(
                        "{} stage exceeded {:?}: {}",
                        stage,
                        limit,
                        process.command_line()
                    );
                    process.kill().await?;
                    process.close(channel).await?;
                    return Ok(StageResult::TimedOut);
                }
            }

            let tick = Instant::now();
            tokio::time::sleep(self.options.poll_interval).await;
            running_for += tick.elapsed();
        }
    }

    fn timed_out(&mut self, stage: Stage, channel: &dyn OutputChannel) -> PipelineOutcome {
        let limit = self.options.stage_timeout.unwrap_or_default();
        emit_diagnostic(
            channel,
            format_args!("{stage} stage timed out after {limit:?}, the process was killed"),
        );
        self.transition(PipelineState::TimedOut);
        PipelineOutcome::TimedOut { stage }
    }

    fn transition(&mut self, next: PipelineState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!("Unexpected pipeline transition {:?} -> {:?}", self.state, next);
        }
        tracing::trace!("Pipeline {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::TokioProcessSpawner;
    use crate::testing::RecordingChannel;

    #[tokio::test]
    async fn test_stage_timeout_bounds_stage_with_lingering_descendant() {
        let mut controller = PipelineController::new(
            Arc::new(TokioProcessSpawner::default()),
            PipelineOptions {
                poll_interval: Duration::from_millis(5),
                stage_timeout: Some(Duration::from_millis(300)),
            },
        );
        let command = ProcessCommandBuilder::new("sh")
            .arg("-c")
            .arg("sleep 6 & sleep 30")
            .build();
        let channel = RecordingChannel::new();
        let started = Instant::now();

        let result = controller
            .run_stage(Stage::Compile, command, &channel)
            .await
            .unwrap();

        assert!(matches!(result, StageResult::TimedOut));
        assert!(
            started.elapsed() < Duration::from_secs(3),
            "stage took {:?}",
            started.elapsed()
        );
    }
}
