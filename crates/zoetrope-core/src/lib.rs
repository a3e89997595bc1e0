//! Shared data model for the zoetrope streaming core.
//!
//! Representations, segment references and the segment index are produced by
//! the manifest layer and consumed read-only by every other crate. The
//! configuration surface (`PlayerOptions`) lives here so all components agree
//! on one set of knobs.

#![forbid(unsafe_code)]

mod config;
mod error;
mod playback;
mod representation;
mod segment;

pub use config::{
    AbrOptions, BufferOptions, PlayerOptions, SchedulerOptions, StallOptions, StartupStrategy,
};
pub use error::{CoreError, CoreResult};
pub use playback::{CarrierClass, NetworkHint, VideoPlaybackQuality};
pub use representation::{Representation, RepresentationId, RepresentationSet, TrackKind};
pub use segment::{BufferedSegmentInfo, SegmentIndex, SegmentReference, UrlTemplate};
