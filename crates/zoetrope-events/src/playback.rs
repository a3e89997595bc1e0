#![forbid(unsafe_code)]

/// Playback-side events surfaced by the core.
#[derive(Clone, Debug)]
pub enum PlaybackEvent {
    /// A stall was confirmed by the detector.
    StallConfirmed { position: f64 },
    /// The gap handler jumped the playhead.
    GapJumped { from: f64, to: f64 },
    /// Fatal error; the core stops accepting work for this source.
    PlaybackError { error: String, fatal: bool },
    /// Stream reached its end.
    EndOfStream,
}
