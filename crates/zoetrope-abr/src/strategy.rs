use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::debug;
use zoetrope_core::{Representation, VideoPlaybackQuality};

/// Plain throughput-window strategy.
///
/// Each representation owns the bandwidth window `[bitrate_i, bitrate_{i+1})`;
/// the safe throughput picks the window it falls into. Throughput below the
/// second rung leaves the choice at the lowest representation, so a valid
/// index is always returned.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThroughputStrategy;

impl ThroughputStrategy {
    const SAFETY_FACTOR: f64 = 0.9;

    pub fn choose(&self, reps: &[Arc<Representation>], bandwidth_bps: u64) -> usize {
        let safe = bandwidth_bps as f64 * Self::SAFETY_FACTOR;
        let mut chosen = 0;
        for (i, rep) in reps.iter().enumerate() {
            let min_bandwidth = rep.bitrate as f64;
            let max_bandwidth = reps.get(i + 1).map_or(f64::INFINITY, |r| r.bitrate as f64);
            if safe >= min_bandwidth && safe < max_bandwidth {
                chosen = i;
            }
        }
        chosen
    }
}

/// Watches decode quality and requests emergency downshifts.
///
/// Counters are cumulative engine-side; the monitor diffs them against a
/// baseline taken whenever the rendered representation changes or the drop
/// ratio recovers.
#[derive(Debug)]
pub struct DroppedFramesMonitor {
    current_rep: Option<usize>,
    baseline: VideoPlaybackQuality,
    latest: VideoPlaybackQuality,
    downswitches: VecDeque<Instant>,
}

impl DroppedFramesMonitor {
    /// Minimum frames observed on the current representation before the
    /// ratio means anything.
    const MIN_SAMPLED_FRAMES: u64 = 375;
    const DROP_RATIO: f64 = 0.15;
    const RESET_RATIO: f64 = 0.075;
    const MAX_DOWNGRADES: usize = 2;
    const DOWNGRADE_WINDOW: Duration = Duration::from_secs(10);

    pub fn new() -> Self {
        Self {
            current_rep: None,
            baseline: VideoPlaybackQuality::default(),
            latest: VideoPlaybackQuality::default(),
            downswitches: VecDeque::new(),
        }
    }

    /// Note which representation is currently rendered; a change rebaselines
    /// the counters.
    pub fn set_current(&mut self, index: usize) {
        if self.current_rep != Some(index) {
            self.current_rep = Some(index);
            self.baseline = self.latest;
        }
    }

    /// Feed a cumulative quality snapshot and decide whether an emergency
    /// one-step downshift is warranted.
    pub fn check(&mut self, now: Instant, quality: VideoPlaybackQuality) -> bool {
        self.latest = quality;

        let sampled = quality.total_frames.saturating_sub(self.baseline.total_frames);
        let dropped = quality
            .dropped_frames
            .saturating_sub(self.baseline.dropped_frames);
        if sampled < Self::MIN_SAMPLED_FRAMES {
            return false;
        }

        let ratio = dropped as f64 / sampled as f64;
        if ratio < Self::RESET_RATIO {
            self.baseline = quality;
            return false;
        }
        if ratio <= Self::DROP_RATIO {
            return false;
        }

        while let Some(&front) = self.downswitches.front() {
            if now.saturating_duration_since(front) > Self::DOWNGRADE_WINDOW {
                self.downswitches.pop_front();
            } else {
                break;
            }
        }
        if self.downswitches.len() >= Self::MAX_DOWNGRADES {
            return false;
        }

        debug!(sampled, dropped, ratio, "dropped-frames downshift requested");
        self.downswitches.push_back(now);
        // The downshift changes the rendered representation; start clean.
        self.baseline = quality;
        true
    }
}

impl Default for DroppedFramesMonitor {
    fn default() -> Self {
        Self::new()
    }
}
