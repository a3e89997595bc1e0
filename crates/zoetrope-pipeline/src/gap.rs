use std::time::{Duration, Instant};

use tracing::debug;
use zoetrope_sink::TimeRanges;

/// Inputs of one gap-handler pass.
#[derive(Clone, Debug)]
pub struct GapCheck<'a> {
    pub position: f64,
    pub paused: bool,
    pub seeking: bool,
    pub quality_switching: bool,
    /// Whether the stall detector currently has a confirmed stall.
    pub stall_confirmed: bool,
    pub duration: Option<f64>,
    pub buffered: &'a TimeRanges,
}

/// Jumps the playhead over small holes in the buffer.
///
/// Runs every 100 ms. A range starting within the jump tolerance ahead is
/// seeked to immediately; with a confirmed stall the handler also nudges out
/// of mid-range freezes and snaps to the stream end when close enough. The
/// same position is never jumped twice.
#[derive(Debug)]
pub struct GapHandler {
    tolerance: f64,
    enabled: bool,
    last_jump_position: Option<f64>,
    last_seek_at: Option<Instant>,
}

impl GapHandler {
    /// Quiet period after any seek before gap jumping resumes.
    const SEEK_HOLDOFF: Duration = Duration::from_secs(2);
    const NUDGE_SECS: f64 = 0.1;
    const END_SNAP_SECS: f64 = 1.5;

    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            enabled: true,
            last_jump_position: None,
            last_seek_at: None,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn last_jump_position(&self) -> Option<f64> {
        self.last_jump_position
    }

    /// Any seek (external or our own) starts the holdoff.
    pub fn note_seek(&mut self, now: Instant) {
        self.last_seek_at = Some(now);
    }

    /// Decide whether to jump; returns the seek target.
    pub fn check(&mut self, now: Instant, check: &GapCheck<'_>) -> Option<f64> {
        if !self.enabled || check.paused || check.seeking || check.quality_switching {
            return None;
        }
        if let Some(at) = self.last_seek_at {
            if now.saturating_duration_since(at) < Self::SEEK_HOLDOFF {
                return None;
            }
        }

        let next = check
            .buffered
            .next_span_after(check.position)
            .filter(|s| s.start > check.position);

        let target = if let Some(span) = next.filter(|s| s.start - check.position <= self.tolerance)
        {
            // Small gap right ahead.
            Some(span.start)
        } else if check.stall_confirmed {
            if let Some(span) = next.filter(|s| s.start - check.position <= 2.0 * self.tolerance) {
                Some(span.start)
            } else if check.buffered.contains(check.position) {
                // Frozen inside a buffered range: micro-nudge.
                Some(check.position + Self::NUDGE_SECS)
            } else {
                check
                    .duration
                    .filter(|d| d - check.position <= Self::END_SNAP_SECS)
            }
        } else {
            None
        }?;

        if self.last_jump_position == Some(target) {
            return None;
        }

        debug!(from = check.position, to = target, "gap jump");
        self.last_jump_position = Some(target);
        self.last_seek_at = Some(now);
        Some(target)
    }
}
