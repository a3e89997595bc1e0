#![forbid(unsafe_code)]

use crate::{AbrEvent, PipelineEvent, PlaybackEvent};

/// Unified event for the streaming core.
///
/// Hierarchical: each subsystem has its own variant with a sub-enum.
#[derive(Clone, Debug)]
pub enum Event {
    Abr(AbrEvent),
    Pipeline(PipelineEvent),
    Playback(PlaybackEvent),
}

impl From<AbrEvent> for Event {
    fn from(e: AbrEvent) -> Self {
        Self::Abr(e)
    }
}

impl From<PipelineEvent> for Event {
    fn from(e: PipelineEvent) -> Self {
        Self::Pipeline(e)
    }
}

impl From<PlaybackEvent> for Event {
    fn from(e: PlaybackEvent) -> Self {
        Self::Playback(e)
    }
}
