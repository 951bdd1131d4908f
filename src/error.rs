use thiserror::Error;

use crate::directives::DirectiveError;
use crate::pipeline::PipelineError;

/// Anything that can abort a submission before or during the pipeline
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directive error: {0}")]
    Directive(#[from] DirectiveError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

pub type Result<T> = std::result::Result<T, Error>;
