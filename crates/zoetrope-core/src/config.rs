use std::time::Duration;

/// Strategy used for the very first quality decision.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StartupStrategy {
    #[default]
    Bandwidth,
    Buffer,
}

/// Quality-selection knobs.
#[derive(Clone, Debug)]
pub struct AbrOptions {
    /// Buffer level below which the throughput strategy preempts BOLA.
    pub min_buffer_level: f64,
    /// Upper bound on `buffering_target + placeholder`.
    pub max_buffer_level: f64,
    /// Minimum time between non-emergency quality switches.
    pub switch_cooldown: Duration,
    pub startup_strategy: StartupStrategy,
    /// Master enable for switch smoothing.
    pub allow_smoothing: bool,
    /// Grace period after start/seek before smoothing activates.
    pub smoothing_enable_delay: Duration,
    /// Step interpolation factor for smoothed switches.
    pub smoothing_factor: f64,
    /// Estimate used until enough bytes have been sampled and no network
    /// hint is available.
    pub default_bandwidth_bps: u64,
}

impl Default for AbrOptions {
    fn default() -> Self {
        Self {
            min_buffer_level: 10.0,
            max_buffer_level: 90.0,
            switch_cooldown: Duration::from_secs(5),
            startup_strategy: StartupStrategy::default(),
            allow_smoothing: true,
            smoothing_enable_delay: Duration::from_secs(5),
            smoothing_factor: 0.5,
            default_bandwidth_bps: 3_000_000,
        }
    }
}

/// Buffer management and download admission knobs.
#[derive(Clone, Debug)]
pub struct BufferOptions {
    /// Target seconds of media buffered ahead of the playhead.
    pub buffering_target: f64,
    /// Retained seconds behind the playhead.
    pub buffer_behind: f64,
    /// Pipeline parallelism for standard sinks (managed sinks use 1).
    pub max_concurrent_downloads: usize,
    /// Enables replacement (fast-switch) downloads after an up-switch.
    pub fast_switching_enabled: bool,
    /// Replacement EDF threshold, in segment durations.
    pub replacement_safety_factor: f64,
    /// Shrink factor applied to the buffer target per quota event.
    pub quota_correction_factor: f64,
    /// Hard ceiling above the target before completed downloads are discarded.
    pub max_allowed_overrun: f64,
    /// Per-segment download timeout; failures near it blacklist the URL.
    pub segment_timeout: Duration,
    /// Cadence of the background prune pass.
    pub pruning_interval: Duration,
}

impl Default for BufferOptions {
    fn default() -> Self {
        Self {
            buffering_target: 60.0,
            buffer_behind: 5.0,
            max_concurrent_downloads: 2,
            fast_switching_enabled: true,
            replacement_safety_factor: 1.5,
            quota_correction_factor: 0.8,
            max_allowed_overrun: 4.0,
            segment_timeout: Duration::from_secs(10),
            pruning_interval: Duration::from_secs(5),
        }
    }
}

/// Scheduler cadence configuration.
#[derive(Clone, Debug)]
pub struct SchedulerOptions {
    pub initial_delay: Duration,
    pub base_interval: Duration,
    pub min_interval: Duration,
    pub max_interval: Duration,
    /// Fill ratio above which the interval stretches toward `max_interval`.
    pub slowdown_threshold: f64,
    /// Per-sink buffer cap while preloading.
    pub preload_target: f64,
    /// Buffer level below which ticks run at `min_interval`.
    pub critical_buffer_level: f64,
    pub quality_check_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            base_interval: Duration::from_millis(500),
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(2000),
            slowdown_threshold: 0.8,
            preload_target: 20.0,
            critical_buffer_level: 5.0,
            quality_check_interval: Duration::from_secs(1),
        }
    }
}

/// Stall detection and gap jumping configuration.
#[derive(Clone, Debug)]
pub struct StallOptions {
    /// Minimum stall duration before confirmation.
    pub stall_threshold: Duration,
    /// Consecutive stall samples required for confirmation.
    pub consecutive_checks_threshold: u32,
    /// Small-gap seek threshold in seconds.
    pub gap_jump_tolerance: f64,
}

impl Default for StallOptions {
    fn default() -> Self {
        Self {
            stall_threshold: Duration::from_millis(250),
            consecutive_checks_threshold: 3,
            gap_jump_tolerance: 0.3,
        }
    }
}

/// Full configuration surface of the streaming core.
///
/// Plain data; `Default` mirrors the documented defaults. Builder methods
/// cover the common overrides.
#[derive(Clone, Debug)]
pub struct PlayerOptions {
    pub abr: AbrOptions,
    pub buffer: BufferOptions,
    pub scheduler: SchedulerOptions,
    pub stall: StallOptions,
    /// Capacity of the events broadcast channel.
    pub event_capacity: usize,
    /// Capacity of the command mpsc channel.
    pub command_capacity: usize,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PlayerOptions {
    pub fn new() -> Self {
        Self {
            abr: AbrOptions::default(),
            buffer: BufferOptions::default(),
            scheduler: SchedulerOptions::default(),
            stall: StallOptions::default(),
            event_capacity: 64,
            command_capacity: 16,
        }
    }

    pub fn with_abr(mut self, abr: AbrOptions) -> Self {
        self.abr = abr;
        self
    }

    pub fn with_buffer(mut self, buffer: BufferOptions) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerOptions) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_stall(mut self, stall: StallOptions) -> Self {
        self.stall = stall;
        self
    }

    pub fn with_buffering_target(mut self, secs: f64) -> Self {
        self.buffer.buffering_target = secs;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = PlayerOptions::new();
        assert_eq!(opts.abr.min_buffer_level, 10.0);
        assert_eq!(opts.abr.max_buffer_level, 90.0);
        assert_eq!(opts.abr.switch_cooldown, Duration::from_secs(5));
        assert_eq!(opts.buffer.buffering_target, 60.0);
        assert_eq!(opts.buffer.buffer_behind, 5.0);
        assert_eq!(opts.buffer.max_concurrent_downloads, 2);
        assert!(opts.buffer.fast_switching_enabled);
        assert_eq!(opts.buffer.segment_timeout, Duration::from_secs(10));
        assert_eq!(opts.scheduler.base_interval, Duration::from_millis(500));
        assert_eq!(opts.stall.consecutive_checks_threshold, 3);
        assert_eq!(opts.stall.gap_jump_tolerance, 0.3);
    }

    #[test]
    fn builders_override_fields() {
        let opts = PlayerOptions::new()
            .with_buffering_target(30.0)
            .with_event_capacity(8);
        assert_eq!(opts.buffer.buffering_target, 30.0);
        assert_eq!(opts.event_capacity, 8);
    }
}
