use thiserror::Error;

/// Media sink operation errors.
///
/// Quota exhaustion is a first-class variant: the pipeline handles it with a
/// dedicated recovery protocol instead of treating it as a failure.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink quota exceeded")]
    QuotaExceeded,

    #[error("sink is {0}, operation not possible")]
    InvalidState(String),

    #[error("append failed: {0}")]
    AppendFailed(String),

    #[error("remove failed: {0}")]
    RemoveFailed(String),

    #[error("sink closed")]
    Closed,
}

pub type SinkResult<T> = Result<T, SinkError>;
