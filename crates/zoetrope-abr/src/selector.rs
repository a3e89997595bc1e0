use std::{collections::VecDeque, sync::Arc, time::Instant};

use tracing::debug;
use zoetrope_core::{AbrOptions, Representation, StartupStrategy, VideoPlaybackQuality};

use crate::{
    bola::BolaController,
    filter::{FilterInputs, filter_representations},
    strategy::{DroppedFramesMonitor, ThroughputStrategy},
    types::{StrategyKind, SwitchReason, SwitchRequest},
};

/// Observations fed into one quality check.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityCheckInputs {
    pub buffer_level: f64,
    pub bandwidth_bps: u64,
    pub quality: VideoPlaybackQuality,
}

/// Composes BOLA, the throughput strategy and the dropped-frames monitor
/// into actual switch requests, with cooldown, smoothing and oscillation
/// suppression applied on top of the raw picks.
pub struct QualitySelector {
    opts: AbrOptions,
    bola: BolaController,
    throughput: ThroughputStrategy,
    dropped: DroppedFramesMonitor,
    filter_inputs: FilterInputs,
    all_reps: Vec<Arc<Representation>>,
    reps: Vec<Arc<Representation>>,
    current: usize,
    abr_enabled: bool,
    last_switch: Option<Instant>,
    smoothing_blocked_until: Option<Instant>,
    /// Applied switch targets, newest last. Bounded FIFO.
    history: VecDeque<usize>,
}

impl QualitySelector {
    const HISTORY_LEN: usize = 10;

    pub fn new(opts: AbrOptions, buffer_target: f64) -> Self {
        Self {
            bola: BolaController::new(&opts, buffer_target),
            opts,
            throughput: ThroughputStrategy,
            dropped: DroppedFramesMonitor::new(),
            filter_inputs: FilterInputs::default(),
            all_reps: Vec::new(),
            reps: Vec::new(),
            current: 0,
            abr_enabled: true,
            last_switch: None,
            smoothing_blocked_until: None,
            history: VecDeque::new(),
        }
    }

    /// Install a representation list (manifest load). Filtering and the
    /// downstream strategies are updated in the same call so all consumers
    /// observe one consistent snapshot.
    pub fn set_representations(&mut self, mut reps: Vec<Arc<Representation>>) {
        reps.sort_by_key(|r| r.bitrate);
        self.all_reps = reps;
        self.refilter();
    }

    /// New display dimensions; re-runs the two-pass filter.
    pub fn update_filter(&mut self, inputs: FilterInputs) {
        self.filter_inputs = inputs;
        self.refilter();
    }

    fn refilter(&mut self) {
        self.reps = filter_representations(&self.all_reps, &self.filter_inputs);
        if self.current >= self.reps.len() && !self.reps.is_empty() {
            self.current = self.reps.len() - 1;
        }
        self.bola.init(self.reps.clone());
        self.bola.set_current_index(self.current);
    }

    /// The filtered list current decisions index into.
    pub fn representations(&self) -> &[Arc<Representation>] {
        &self.reps
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_representation(&self) -> Option<&Arc<Representation>> {
        self.reps.get(self.current)
    }

    pub fn is_abr_enabled(&self) -> bool {
        self.abr_enabled
    }

    pub fn set_abr_enabled(&mut self, enabled: bool) {
        self.abr_enabled = enabled;
    }

    pub fn set_buffer_target(&mut self, buffer_target: f64) {
        self.bola.set_buffer_target(buffer_target);
    }

    pub fn on_playback_start(&mut self, now: Instant) {
        self.smoothing_blocked_until = Some(now + self.opts.smoothing_enable_delay);
    }

    pub fn on_seek(&mut self, now: Instant) {
        self.bola.on_seek();
        self.smoothing_blocked_until = Some(now + self.opts.smoothing_enable_delay);
    }

    pub fn on_buffer_empty(&mut self) {
        self.bola.on_buffer_empty();
    }

    pub fn on_segment_download_begin(&mut self, now: Instant, segment_start: f64) {
        self.bola.on_segment_download_begin(now, segment_start);
    }

    pub fn on_segment_download_end(
        &mut self,
        now: Instant,
        duration_secs: f64,
        is_replacement: bool,
    ) {
        self.bola
            .on_segment_download_end(now, duration_secs, is_replacement);
    }

    /// Record that the current anchor was actually applied downstream as
    /// the first selection for the track. Without this the history stays
    /// empty when the startup pick lands on the default anchor, and later
    /// genuine switches would still be classified as startup ones.
    pub fn note_initial_selection(&mut self, now: Instant) {
        if self.history.is_empty() && !self.reps.is_empty() {
            self.history.push_back(self.current);
            self.last_switch = Some(now);
            self.dropped.set_current(self.current);
        }
    }

    /// Explicit user override; always wins and is exempt from cooldown.
    pub fn force_representation(
        &mut self,
        id: zoetrope_core::RepresentationId,
        now: Instant,
    ) -> Option<SwitchRequest> {
        let index = self.reps.iter().position(|r| r.id == id)?;
        if index == self.current {
            return None;
        }
        Some(self.apply_switch(index, SwitchReason::ChosenByUser, now))
    }

    /// One quality check. Returns a switch request when the composed
    /// strategies, cooldown and smoothing all agree a change is due.
    pub fn check_playback_quality(
        &mut self,
        now: Instant,
        inputs: QualityCheckInputs,
    ) -> Option<SwitchRequest> {
        if !self.abr_enabled || self.reps.is_empty() {
            return None;
        }

        // Emergency path: decode pressure forces one step down, bypassing
        // cooldown and smoothing.
        self.dropped.set_current(self.current);
        if self.dropped.check(now, inputs.quality) && self.current > 0 {
            let target = self.current - 1;
            debug!(from = self.current, to = target, "dropped-frames downshift");
            return Some(self.apply_switch(target, SwitchReason::DroppedFrames, now));
        }

        // Cooldown before the strategies run at all, so a skipped check does
        // not disturb their internal anchors.
        if let Some(last) = self.last_switch {
            if now.saturating_duration_since(last) < self.opts.switch_cooldown {
                return None;
            }
        }

        let strategy = self.pick_strategy(inputs.buffer_level);
        let (raw_target, reason) = match strategy {
            StrategyKind::Buffer => {
                let choice = self.bola.choose(now, inputs.buffer_level, Some(inputs.bandwidth_bps));
                (choice.index, SwitchReason::Buffer)
            }
            StrategyKind::Bandwidth => {
                let index = self.throughput.choose(&self.reps, inputs.bandwidth_bps);
                let reason = if self.history.is_empty() {
                    SwitchReason::Start
                } else {
                    SwitchReason::Bandwidth
                };
                (index, reason)
            }
            StrategyKind::DroppedFrames => unreachable!("handled above"),
        };

        let target = self.smooth(raw_target, now);
        if target == self.current {
            self.bola.set_current_index(self.current);
            return None;
        }

        Some(self.apply_switch(target, reason, now))
    }

    fn pick_strategy(&self, buffer_level: f64) -> StrategyKind {
        if self.history.is_empty() {
            return match self.opts.startup_strategy {
                StartupStrategy::Bandwidth => StrategyKind::Bandwidth,
                StartupStrategy::Buffer => StrategyKind::Buffer,
            };
        }
        if buffer_level >= self.opts.min_buffer_level {
            StrategyKind::Buffer
        } else {
            StrategyKind::Bandwidth
        }
    }

    /// Translate a raw strategy pick through oscillation suppression and
    /// step interpolation.
    fn smooth(&self, target: usize, now: Instant) -> usize {
        if !self.opts.allow_smoothing {
            return target;
        }
        // Smoothing only arms after playback start (or seek) plus the grace
        // period; before that, raw picks pass through.
        let Some(armed_at) = self.smoothing_blocked_until else {
            return target;
        };
        if now < armed_at {
            return target;
        }

        if self.is_oscillating() {
            // Let downswitches through, clamp upswitches to where we are.
            return if target < self.current {
                target
            } else {
                self.current
            };
        }

        let current = self.current as f64;
        let stepped = current + (target as f64 - current) * self.opts.smoothing_factor;
        (stepped.round() as usize).min(self.reps.len().saturating_sub(1))
    }

    /// A,B,A,B over the last four applied switches.
    fn is_oscillating(&self) -> bool {
        if self.history.len() < 4 {
            return false;
        }
        let last: Vec<usize> = self.history.iter().rev().take(4).copied().collect();
        last[0] == last[2] && last[1] == last[3] && last[0] != last[1]
    }

    fn apply_switch(&mut self, index: usize, reason: SwitchReason, now: Instant) -> SwitchRequest {
        self.current = index;
        self.bola.set_current_index(index);
        self.dropped.set_current(index);
        self.last_switch = Some(now);
        self.history.push_back(index);
        while self.history.len() > Self::HISTORY_LEN {
            self.history.pop_front();
        }
        let rep = &self.reps[index];
        SwitchRequest {
            index,
            representation: rep.id,
            bitrate: rep.bitrate,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use zoetrope_core::{RepresentationId, SegmentIndex, TrackKind};

    use super::*;

    fn rep(id: u32, bitrate_kbps: u64) -> Arc<Representation> {
        Arc::new(Representation {
            id: RepresentationId(id),
            kind: TrackKind::Video,
            bitrate: bitrate_kbps * 1000,
            mime_type: "video/mp4".into(),
            codecs: "avc1.64001f".into(),
            width: 1280,
            height: 720,
            frame_rate: 30.0,
            init_url: None,
            index: SegmentIndex::default(),
        })
    }

    fn selector() -> QualitySelector {
        let mut s = QualitySelector::new(AbrOptions::default(), 60.0);
        s.set_representations(vec![rep(0, 400), rep(1, 1000), rep(2, 3000), rep(3, 6000)]);
        s
    }

    fn inputs(buffer: f64, bandwidth: u64) -> QualityCheckInputs {
        QualityCheckInputs {
            buffer_level: buffer,
            bandwidth_bps: bandwidth,
            quality: VideoPlaybackQuality::default(),
        }
    }

    #[test]
    fn disabled_abr_never_switches() {
        let mut s = selector();
        s.set_abr_enabled(false);
        assert!(s
            .check_playback_quality(Instant::now(), inputs(0.0, 50_000_000))
            .is_none());
    }

    #[test]
    fn first_check_uses_startup_strategy() {
        let mut s = selector();
        // Plenty of buffer would normally pick BOLA, but the startup
        // strategy is Bandwidth.
        let req = s
            .check_playback_quality(Instant::now(), inputs(30.0, 5_000_000))
            .expect("switch");
        assert_eq!(req.reason, SwitchReason::Start);
        assert_eq!(req.index, 2); // 4.5 Mbps safe -> 3000 kbps window
    }

    #[test]
    fn cooldown_suppresses_back_to_back_switches() {
        let mut s = selector();
        let t0 = Instant::now();
        assert!(s.check_playback_quality(t0, inputs(2.0, 5_000_000)).is_some());
        // Second check shortly after: throughput collapsed, but cooldown
        // holds the line.
        let t1 = t0 + Duration::from_secs(2);
        assert!(s.check_playback_quality(t1, inputs(2.0, 500_000)).is_none());
        // After the cooldown the downswitch goes through.
        let t2 = t0 + Duration::from_secs(6);
        let req = s.check_playback_quality(t2, inputs(2.0, 500_000));
        assert!(req.is_some());
        assert!(req.unwrap().index < 2);
    }

    #[test]
    fn dropped_frames_bypass_cooldown() {
        let mut s = selector();
        let t0 = Instant::now();
        let first = s
            .check_playback_quality(t0, inputs(2.0, 5_000_000))
            .expect("startup switch");
        assert_eq!(first.index, 2);

        // 1 s later, decode falls apart: emergency downshift despite the
        // 5 s cooldown.
        let t1 = t0 + Duration::from_secs(1);
        let req = s
            .check_playback_quality(
                t1,
                QualityCheckInputs {
                    buffer_level: 20.0,
                    bandwidth_bps: 5_000_000,
                    quality: VideoPlaybackQuality {
                        dropped_frames: 120,
                        total_frames: 600,
                    },
                },
            )
            .expect("emergency downshift");
        assert_eq!(req.reason, SwitchReason::DroppedFrames);
        assert_eq!(req.index, 1);
    }

    #[test]
    fn smoothing_halves_large_steps() {
        let mut s = selector();
        let t0 = Instant::now();
        s.on_playback_start(t0);
        // Seed history so the startup strategy is behind us.
        assert!(s.check_playback_quality(t0, inputs(2.0, 1_000_000)).is_some()
            || s.current_index() == 0);

        // Past the smoothing grace period, with a raw target 3 rungs up:
        // the applied step is round(0 + 3 * 0.5) = 2.
        let t1 = t0 + Duration::from_secs(20);
        let req = s.check_playback_quality(t1, inputs(4.0, 50_000_000));
        if let Some(req) = req {
            assert!(req.index <= 2, "smoothing should clamp the jump");
        }
    }

    #[test]
    fn oscillation_pattern_clamps_upswitches() {
        let mut s = selector();
        let t = Instant::now();
        // Fabricate an A,B,A,B history.
        s.history = [1, 2, 1, 2].into_iter().collect();
        s.current = 1;
        s.last_switch = None;
        s.smoothing_blocked_until = Some(t);

        // Raw pick would go up (huge bandwidth, thin buffer -> throughput
        // strategy -> index 3), but oscillation clamps to current.
        assert!(s
            .check_playback_quality(t, inputs(2.0, 50_000_000))
            .is_none());

        // Downswitches still pass.
        let req = s.check_playback_quality(t, inputs(2.0, 300_000));
        assert_eq!(req.map(|r| r.index), Some(0));
    }

    #[test]
    fn force_representation_is_immediate() {
        let mut s = selector();
        let req = s
            .force_representation(RepresentationId(3), Instant::now())
            .expect("forced");
        assert_eq!(req.reason, SwitchReason::ChosenByUser);
        assert_eq!(req.index, 3);
        assert_eq!(s.current_index(), 3);
    }

    #[test]
    fn filter_update_remaps_current_index() {
        let mut s = selector();
        s.force_representation(RepresentationId(3), Instant::now());
        // A hard bitrate cap shrinks the list under the current index.
        s.update_filter(FilterInputs {
            bitrate_cap: Some(1_500_000),
            ..FilterInputs::default()
        });
        assert_eq!(s.representations().len(), 2);
        assert!(s.current_index() < 2);
    }

    #[test]
    fn no_request_when_target_equals_current() {
        let mut s = selector();
        let t0 = Instant::now();
        let first = s
            .check_playback_quality(t0, inputs(2.0, 5_000_000))
            .expect("startup");
        // Same conditions after cooldown: same pick, no request.
        let t1 = t0 + Duration::from_secs(10);
        assert!(s.check_playback_quality(t1, inputs(2.0, 5_000_000)).is_none());
        assert_eq!(s.current_index(), first.index);
    }
}
