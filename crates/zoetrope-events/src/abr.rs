#![forbid(unsafe_code)]

use zoetrope_abr::SwitchReason;
use zoetrope_core::{RepresentationId, TrackKind};

/// Quality-selection events.
#[derive(Clone, Debug)]
pub enum AbrEvent {
    /// The set of selectable representations changed (manifest load or
    /// display filter update).
    RepresentationsChanged {
        kind: TrackKind,
        count: usize,
    },
    /// Latched current video quality.
    VideoBitrateChanged {
        representation: RepresentationId,
        bitrate: u64,
        reason: SwitchReason,
    },
    /// Latched current audio quality.
    AudioBitrateChanged {
        representation: RepresentationId,
        bitrate: u64,
        reason: SwitchReason,
    },
}
