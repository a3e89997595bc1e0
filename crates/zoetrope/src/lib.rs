//! Zoetrope: the adaptive-bitrate streaming core of a DASH player.
//!
//! Given a representation set from the manifest layer, a fetch transport, a
//! media sink and a playback engine handle, the [`CoreSession`] decides which
//! quality to fetch, which segment number, and when; manages a bounded media
//! buffer through seeks, quality changes and quota pressure; and watches
//! playback for stalls and buffer gaps.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use zoetrope::{CoreSession, PlayerCommand, PlayerOptions};
//! use zoetrope_net::{HttpFetcher, NetOptions};
//! use zoetrope_pipeline::mock::MockPlayback;
//! use zoetrope_sink::MemorySinkFactory;
//!
//! # async fn demo() {
//! let fetcher = Arc::new(HttpFetcher::new(NetOptions::default()));
//! let playback = Arc::new(MockPlayback::new());
//! let (session, handle) = CoreSession::new(
//!     PlayerOptions::default(),
//!     playback,
//!     fetcher,
//!     Box::new(MemorySinkFactory::new()),
//!     None,
//! );
//! let _events = handle.subscribe();
//! tokio::spawn(session.run());
//! handle.send(PlayerCommand::PlaybackStarted).await.ok();
//! # }
//! ```

#![forbid(unsafe_code)]

mod session;

pub use session::{CoreHandle, CoreSession, PlayerCommand};
pub use zoetrope_core::{
    AbrOptions, BufferOptions, PlayerOptions, Representation, RepresentationId, SchedulerOptions,
    SegmentIndex, SegmentReference, StallOptions, TrackKind, UrlTemplate,
};
pub use zoetrope_events::{AbrEvent, Event, EventBus, PipelineEvent, PlaybackEvent};
