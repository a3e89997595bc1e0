use thiserror::Error;
use zoetrope_sink::SinkError;

/// Pipeline-fatal conditions.
///
/// Transient faults (network errors, quota pressure, single bad segments)
/// are absorbed inside the pipeline; what escapes here ends the session for
/// the current source.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no representation selected")]
    NoRepresentation,

    #[error("media sink unusable: {0}")]
    SinkUnusable(SinkError),

    #[error("sink factory failed: {0}")]
    SinkOpen(SinkError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
