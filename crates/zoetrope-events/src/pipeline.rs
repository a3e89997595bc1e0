#![forbid(unsafe_code)]

use std::time::Duration;

use zoetrope_core::{RepresentationId, TrackKind};

/// Segment pipeline events.
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// A segment download was dispatched.
    FragmentLoadingStarted {
        kind: TrackKind,
        representation: RepresentationId,
        segment_number: u64,
        is_replacement: bool,
    },
    /// A segment download finished (successfully or not).
    FragmentLoadingCompleted {
        kind: TrackKind,
        representation: RepresentationId,
        segment_number: u64,
        status: u16,
        duration: Duration,
        from_cache: bool,
        transferred_bytes: u64,
        resource_bytes: u64,
        is_replacement: bool,
        /// Set when the completed download was thrown away instead of
        /// queued (buffer overrun, stale representation).
        discarded: bool,
        reason: Option<String>,
    },
    /// Video buffer level after an append or prune.
    BufferLevelUpdated { level: f64 },
    /// Quota recovery shrank the buffer target.
    BufferTargetChanged { new_target: f64 },
}
