//! Media sink abstraction for the zoetrope streaming core.
//!
//! The pipeline is the only writer of a sink; stall detection and quality
//! strategies read the buffered view. [`MemorySink`] is the in-memory
//! implementation used across the workspace's tests, with scripted quota
//! failures and an eviction knob.

#![forbid(unsafe_code)]

mod error;
mod memory;
mod ranges;
mod traits;

pub use error::{SinkError, SinkResult};
pub use memory::{MemorySink, MemorySinkFactory, SharedMemorySink};
pub use ranges::{TimeRanges, TimeSpan};
pub use traits::{MediaSink, SinkFactory, SinkState};
