//! Pipeline states and outcomes

use std::fmt;

use crate::subprocess::ExitStatus;

/// Position of a submission in the compile → link → execute sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    Compiling,
    Linking,
    Executing,
    Done,
    /// Compile or link exited non-zero
    Failed,
    /// A stage exceeded the configured stage timeout
    TimedOut,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Done | PipelineState::Failed | PipelineState::TimedOut
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Start, Compiling)
                | (Compiling, Linking)
                | (Compiling, Failed)
                | (Linking, Executing)
                | (Linking, Failed)
                | (Executing, Done)
                | (Compiling | Linking | Executing, TimedOut)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Compile,
    Link,
    Execute,
}

impl Stage {
    pub fn state(&self) -> PipelineState {
        match self {
            Stage::Compile => PipelineState::Compiling,
            Stage::Link => PipelineState::Linking,
            Stage::Execute => PipelineState::Executing,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Compile => f.write_str("compile"),
            Stage::Link => f.write_str("link"),
            Stage::Execute => f.write_str("execute"),
        }
    }
}

/// How a pipeline run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The program ran; its own exit status never fails the pipeline
    Completed { exit_status: ExitStatus },
    CompileFailed { status: ExitStatus },
    LinkFailed { status: ExitStatus },
    TimedOut { stage: Stage },
}

impl PipelineOutcome {
    /// True when the program was built and executed
    pub fn executed(&self) -> bool {
        matches!(self, PipelineOutcome::Completed { .. })
    }
}
