use thiserror::Error;

/// Fatal conditions of the streaming core.
///
/// Transient faults (network, quota, single-segment append errors) are
/// recovered inside the pipeline and never reach this enum; what remains
/// terminates the current session.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no representations available for {0}")]
    NoRepresentations(String),

    #[error("media sink is {state}; no further operations possible")]
    SinkUnusable { state: String },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("session is shut down")]
    ShutDown,
}

pub type CoreResult<T> = Result<T, CoreError>;
