//! Segment pipeline, scheduler and stall handling for the zoetrope
//! streaming core.
//!
//! The [`SegmentPipeline`] owns everything between "which segment next" and
//! "bytes are in the sink": download dispatch with admission control, the
//! ordered append queue, replacement (fast-switch) processing, quota
//! recovery, pruning and seek handling. The [`Scheduler`] paces it, the
//! [`StallDetector`] and [`GapHandler`] watch playback.
//!
//! Everything here is driven from a single task; the only concurrency is
//! the set of in-flight fetches, polled from that same task.

#![forbid(unsafe_code)]

mod blacklist;
mod buffered;
mod error;
mod gap;
pub mod mock;
mod pipeline;
mod playback;
mod scheduler;
mod stall;

pub use buffered::{BufferedSegmentMap, effective_buffer_level};
pub use error::{PipelineError, PipelineResult};
pub use gap::{GapCheck, GapHandler};
pub use pipeline::{CompletedDownload, DownloadOutcome, SegmentPipeline, StartedDownload};
pub use playback::PlaybackHandle;
pub use scheduler::Scheduler;
pub use stall::{PlayerContext, StallDetector, StallSample};
