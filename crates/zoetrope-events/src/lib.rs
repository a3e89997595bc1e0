//! Event model and bus for the zoetrope streaming core.
//!
//! Hierarchical: each subsystem owns a sub-enum, the unified [`Event`] wraps
//! them, and the [`EventBus`] broadcasts to any number of subscribers.

#![forbid(unsafe_code)]

mod abr;
mod bus;
mod event;
mod pipeline;
mod playback;

pub use abr::AbrEvent;
pub use bus::EventBus;
pub use event::Event;
pub use pipeline::PipelineEvent;
pub use playback::PlaybackEvent;
