use thiserror::Error;

/// Fetch transport errors.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("HTTP status {status}")]
    Status { status: u16 },

    #[error("request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connect(String),

    #[error("body read error: {0}")]
    Body(String),

    #[error("cancelled")]
    Cancelled,

    #[error("retries exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },
}

impl NetError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Connect(_) | Self::Body(_) => true,
            Self::Status { status } => *status >= 500,
            Self::Cancelled | Self::RetryExhausted { .. } => false,
        }
    }

    /// Permanent resource errors blacklist the URL instead of retrying.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404 })
    }
}

pub type NetResult<T> = Result<T, NetError>;
