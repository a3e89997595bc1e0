use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    error::SinkResult,
    ranges::{TimeRanges, TimeSpan},
};

/// Lifecycle state of a media sink.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SinkState {
    #[default]
    Open,
    Ended,
    Closed,
}

impl std::fmt::Display for SinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Ended => write!(f, "ended"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Byte-range media buffer (MSE-shaped).
///
/// `append`/`remove` complete on the backend's update notification; the
/// pipeline serializes them, so implementations may assume at most one
/// mutation in flight. `span` is the media interval the appended bytes
/// cover, advisory for backends that derive timing from the container
/// themselves and authoritative for backends that do not.
#[async_trait]
pub trait MediaSink: Send {
    async fn append(&mut self, bytes: Bytes, span: TimeSpan) -> SinkResult<()>;

    async fn remove(&mut self, start: f64, end: f64) -> SinkResult<()>;

    /// Current buffered intervals.
    fn buffered(&self) -> TimeRanges;

    fn state(&self) -> SinkState;

    /// Abort the in-flight operation, if any.
    async fn abort(&mut self) -> SinkResult<()>;

    /// In-place codec reconfiguration. `Ok(false)` means unsupported and the
    /// caller must tear down and recreate the sink.
    fn change_type(&mut self, mime: &str, codecs: &str) -> SinkResult<bool>;

    async fn close(&mut self) -> SinkResult<()>;

    /// Managed sinks evict on their own and tolerate only one download in
    /// flight.
    fn is_managed(&self) -> bool {
        false
    }
}

/// Creates sinks on demand (first quality decision, teardown-recreate on a
/// codec change the sink cannot absorb).
pub trait SinkFactory: Send {
    fn open(&mut self, mime: &str, codecs: &str) -> SinkResult<Box<dyn MediaSink>>;
}
