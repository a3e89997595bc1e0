use zoetrope_core::VideoPlaybackQuality;

/// Read-only view of the playback engine plus the seek command.
///
/// The core never mutates playback state except through `seek_to`.
pub trait PlaybackHandle: Send + Sync {
    /// Current playhead position in seconds.
    fn position(&self) -> f64;

    /// Media duration, `None` while unknown.
    fn duration(&self) -> Option<f64>;

    fn is_paused(&self) -> bool;

    fn is_seeking(&self) -> bool;

    fn playback_rate(&self) -> f64;

    fn video_quality(&self) -> VideoPlaybackQuality;

    /// Command the engine to seek. Used by the gap handler.
    fn seek_to(&self, time: f64);
}
