//! Build-and-run pipeline for one submission
//!
//! The [`PipelineController`] walks `Start → Compiling → Linking →
//! Executing → Done` inside a [`Workspace`], stopping at `Failed` when the
//! assembler or linker exits non-zero.

pub mod controller;
pub mod state;
pub mod workspace;


pub use controller::{PipelineController, PipelineOptions};
pub use state::{PipelineOutcome, PipelineState, Stage};
pub use workspace::Workspace;

use crate::subprocess::ProcessError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Workspace error: {0}")]
    Workspace(#[source] std::io::Error),

    #[error(transparent)]
    Process(#[from] ProcessError),
}
