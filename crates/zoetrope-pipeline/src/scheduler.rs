use std::time::{Duration, Instant};

use tracing::trace;
use zoetrope_core::SchedulerOptions;

/// Adaptive tick cadence for the download loop.
///
/// The interval tightens when the buffer runs low and stretches toward
/// `max_interval` as it fills; changes are smoothed so a single outlier
/// reading does not yank the cadence around.
#[derive(Debug)]
pub struct Scheduler {
    opts: SchedulerOptions,
    current: Duration,
    preloading: bool,
    stopped: bool,
    last_quality_check: Option<Instant>,
}

impl Scheduler {
    pub fn new(opts: SchedulerOptions) -> Self {
        let current = opts.base_interval;
        Self {
            opts,
            current,
            preloading: true,
            stopped: false,
            last_quality_check: None,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_preloading(&self) -> bool {
        self.preloading
    }

    pub fn current_interval(&self) -> Duration {
        self.current
    }

    /// First tick delay after a source change.
    pub fn initial_delay(&self) -> Duration {
        self.opts.initial_delay
    }

    /// Per-sink buffer cap while preloading.
    pub fn preload_target(&self) -> f64 {
        self.opts.preload_target
    }

    /// Derive, smooth and clamp the next tick interval.
    pub fn next_interval(
        &mut self,
        buffer_level: f64,
        buffer_target: f64,
        avg_segment_duration_secs: f64,
    ) -> Duration {
        let target = self.target_interval(buffer_level, buffer_target, avg_segment_duration_secs);

        let smoothed = 0.7 * self.current.as_secs_f64() + 0.3 * target.as_secs_f64();
        let clamped = smoothed
            .max(self.opts.min_interval.as_secs_f64())
            .min(self.opts.max_interval.as_secs_f64());
        self.current = Duration::from_secs_f64(clamped);

        trace!(
            buffer_level,
            interval_ms = self.current.as_millis() as u64,
            "scheduler interval"
        );
        self.current
    }

    fn target_interval(
        &self,
        buffer_level: f64,
        buffer_target: f64,
        avg_segment_duration_secs: f64,
    ) -> Duration {
        if buffer_level < self.opts.critical_buffer_level {
            return self.opts.min_interval;
        }
        if buffer_level >= buffer_target {
            return self.opts.max_interval;
        }

        let fill = (buffer_level / buffer_target.max(f64::EPSILON)).clamp(0.0, 1.0);
        let base = self.opts.base_interval.as_secs_f64();
        let max = self.opts.max_interval.as_secs_f64();
        let mut target = if fill < self.opts.slowdown_threshold {
            base
        } else {
            let t = (fill - self.opts.slowdown_threshold)
                / (1.0 - self.opts.slowdown_threshold).max(f64::EPSILON);
            base + (max - base) * t
        };

        // While still filling, never tick slower than half a segment.
        if avg_segment_duration_secs > 0.0 {
            target = target.min(0.5 * avg_segment_duration_secs);
        }

        Duration::from_secs_f64(target)
    }

    /// Whether a quality check is due at `now`; records the check when so.
    pub fn should_check_quality(&mut self, now: Instant) -> bool {
        if self.preloading || self.stopped {
            return false;
        }
        let due = match self.last_quality_check {
            None => true,
            Some(at) => now.saturating_duration_since(at) >= self.opts.quality_check_interval,
        };
        if due {
            self.last_quality_check = Some(now);
        }
        due
    }

    // Lifecycle transitions.

    pub fn on_source_change(&mut self) {
        self.stopped = false;
        self.preloading = true;
        self.current = self.opts.base_interval;
        self.last_quality_check = None;
    }

    pub fn on_playback_started(&mut self) {
        self.preloading = false;
    }

    /// Pause slows the loop down only when the buffer is healthy; a thin
    /// buffer keeps filling at the current pace.
    pub fn on_pause(&mut self, buffer_healthy: bool) {
        if buffer_healthy {
            self.current *= 2;
        }
    }

    pub fn on_seek(&mut self) {
        self.current = self.opts.min_interval;
        self.stopped = false;
    }

    pub fn on_end(&mut self) {
        self.stopped = true;
    }
}
