use std::{sync::Arc, time::Instant};

use tracing::debug;
use zoetrope_core::{AbrOptions, Representation};

/// BOLA operating mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BolaMode {
    /// Throughput-driven picks until one full segment is buffered.
    Startup,
    /// Buffer-based score maximization.
    SteadyState,
    /// Single representation; nothing to decide.
    OneBitrate,
}

/// Outcome of one [`BolaController::choose`] call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BolaChoice {
    /// Index into the controller's representation snapshot.
    pub index: usize,
    /// Seconds the caller should hold off before the next download because
    /// the effective buffer overflows the selected representation's range.
    pub delay_secs: f64,
}

/// Buffer-based quality controller (BOLA).
///
/// Owns all BOLA state exclusively. Time is passed into every method so the
/// controller is deterministic under test.
#[derive(Debug)]
pub struct BolaController {
    min_buffer_level: f64,
    max_buffer_level: f64,
    buffer_target: f64,
    reps: Vec<Arc<Representation>>,
    utilities: Vec<f64>,
    gp: f64,
    vp: f64,
    mode: BolaMode,
    current: usize,
    placeholder: f64,
    last_call: Option<Instant>,
    last_segment_request: Option<Instant>,
    last_segment_finish: Option<Instant>,
    last_segment_start: Option<f64>,
    last_segment_duration: Option<f64>,
    most_advanced_start: Option<f64>,
    last_was_replacement: bool,
    segment_count: u64,
}

impl BolaController {
    /// Throughput safety factor applied during startup and by the
    /// oscillation guard.
    const SAFETY_FACTOR: f64 = 0.9;
    /// Minimum seconds of buffer budget per extra quality level.
    const BUFFER_PER_LEVEL_SECS: f64 = 2.0;
    const MIN_BUFFER_TIME_SECS: f64 = 12.0;
    const UP_SWITCH_BIAS: f64 = 1.2;
    const DOWN_SWITCH_BIAS: f64 = 0.95;

    pub fn new(abr: &AbrOptions, buffer_target: f64) -> Self {
        Self {
            min_buffer_level: abr.min_buffer_level,
            max_buffer_level: abr.max_buffer_level,
            buffer_target,
            reps: Vec::new(),
            utilities: Vec::new(),
            gp: 0.0,
            vp: 0.0,
            mode: BolaMode::Startup,
            current: 0,
            placeholder: 0.0,
            last_call: None,
            last_segment_request: None,
            last_segment_finish: None,
            last_segment_start: None,
            last_segment_duration: None,
            most_advanced_start: None,
            last_was_replacement: false,
            segment_count: 0,
        }
    }

    /// Install a representation snapshot (ascending bitrate) and derive the
    /// utility vector and `gp`/`vp` gains.
    ///
    /// Re-initializing with an identical set leaves utilities and gains
    /// unchanged; a different set restarts in [`BolaMode::Startup`].
    pub fn init(&mut self, reps: Vec<Arc<Representation>>) {
        debug_assert!(reps.windows(2).all(|w| w[0].bitrate <= w[1].bitrate));

        let same_set = self.reps.len() == reps.len()
            && self
                .reps
                .iter()
                .zip(reps.iter())
                .all(|(a, b)| a.id == b.id && a.bitrate == b.bitrate);

        let n = reps.len();
        if n == 0 {
            self.reps = reps;
            self.utilities.clear();
            return;
        }

        let base = reps[0].bitrate as f64;
        self.utilities = reps
            .iter()
            .map(|r| (r.bitrate as f64 / base).ln() + 1.0)
            .collect();

        if n == 1 {
            self.gp = 1.0;
            self.vp = self.min_buffer_level;
            self.mode = BolaMode::OneBitrate;
        } else {
            let buffer_time = (self.min_buffer_level + Self::BUFFER_PER_LEVEL_SECS * n as f64)
                .max(Self::MIN_BUFFER_TIME_SECS);
            let top_utility = self.utilities[n - 1];
            self.gp = (top_utility - 1.0) / (buffer_time / self.min_buffer_level - 1.0);
            self.vp = self.min_buffer_level / self.gp;
            if !same_set {
                self.mode = BolaMode::Startup;
            } else if self.mode == BolaMode::OneBitrate {
                self.mode = BolaMode::Startup;
            }
        }

        self.reps = reps;
        if self.current >= n {
            self.current = n - 1;
        }

        debug!(
            representations = n,
            gp = self.gp,
            vp = self.vp,
            mode = ?self.mode,
            "BOLA initialized"
        );
    }

    pub fn mode(&self) -> BolaMode {
        self.mode
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Re-anchor the controller at the quality actually applied downstream
    /// (smoothing or an override may diverge from the raw BOLA pick).
    pub fn set_current_index(&mut self, index: usize) {
        if index < self.reps.len() {
            self.current = index;
        }
    }

    /// Adopt a new buffer target (quota recovery shrinks it); re-caps the
    /// placeholder account.
    pub fn set_buffer_target(&mut self, buffer_target: f64) {
        self.buffer_target = buffer_target;
        self.cap_placeholder();
    }

    pub fn placeholder_buffer(&self) -> f64 {
        self.placeholder
    }

    pub fn segment_count(&self) -> u64 {
        self.segment_count
    }

    /// Buffer level at which representation `i` starts beating `i − 1` on
    /// the BOLA score. Zero for the lowest representation.
    pub fn min_buffer_for_rep(&self, i: usize) -> f64 {
        if i == 0 || i >= self.reps.len() {
            return 0.0;
        }
        let j = i - 1;
        let b_i = self.reps[i].bitrate as f64;
        let b_j = self.reps[j].bitrate as f64;
        let util_i = self.utilities[i] + self.gp - 1.0;
        let util_j = self.utilities[j] + self.gp - 1.0;
        self.vp * (b_i * util_j - b_j * util_i) / (b_i - b_j)
    }

    /// Upper end of representation `i`'s buffer range: the next level's
    /// minimum buffer, or the global maximum for the top representation.
    pub fn max_buffer_for_rep(&self, i: usize) -> f64 {
        if i + 1 < self.reps.len() {
            self.min_buffer_for_rep(i + 1)
        } else {
            self.max_buffer_level
        }
    }

    /// Select a representation for the next download.
    ///
    /// `bandwidth_bps` is the estimator's current view, `None` when nothing
    /// is known at all.
    pub fn choose(
        &mut self,
        now: Instant,
        buffer_level: f64,
        bandwidth_bps: Option<u64>,
    ) -> BolaChoice {
        assert!(!self.reps.is_empty(), "choose() before init()");

        if self.mode == BolaMode::OneBitrate {
            self.current = 0;
            return BolaChoice {
                index: 0,
                delay_secs: 0.0,
            };
        }

        // One full segment buffered ends startup. Skipped while no segment
        // has completed yet.
        if self.mode == BolaMode::Startup {
            if let Some(d) = self.last_segment_duration {
                if buffer_level >= d {
                    self.mode = BolaMode::SteadyState;
                    debug!(buffer_level, "BOLA startup -> steady state");
                }
            }
        }

        match self.mode {
            BolaMode::Startup => self.choose_startup(buffer_level, bandwidth_bps),
            BolaMode::SteadyState => self.choose_steady(now, buffer_level, bandwidth_bps),
            BolaMode::OneBitrate => unreachable!("handled above"),
        }
    }

    fn choose_startup(&mut self, buffer_level: f64, bandwidth_bps: Option<u64>) -> BolaChoice {
        let index = match bandwidth_bps {
            Some(bw) => self.sustainable_index(bw),
            None => 0,
        };

        // Pre-charge the placeholder so the effective buffer immediately
        // sits at the steady-state threshold for the selected quality.
        self.placeholder = (self.min_buffer_for_rep(index) - buffer_level).max(0.0);
        self.cap_placeholder();
        self.current = index;

        debug!(
            index,
            ?bandwidth_bps,
            placeholder = self.placeholder,
            "BOLA startup choice"
        );

        BolaChoice {
            index,
            delay_secs: 0.0,
        }
    }

    fn choose_steady(
        &mut self,
        now: Instant,
        buffer_level: f64,
        bandwidth_bps: Option<u64>,
    ) -> BolaChoice {
        self.update_placeholder(now);

        let effective = buffer_level + self.placeholder;

        let mut best = 0usize;
        let mut best_score = f64::NEG_INFINITY;
        for (i, rep) in self.reps.iter().enumerate() {
            let util = self.utilities[i] + self.gp - 1.0;
            let mut score = (self.vp * util - effective) / rep.bitrate as f64;
            if i > self.current {
                score *= Self::UP_SWITCH_BIAS;
            } else if i < self.current {
                score *= Self::DOWN_SWITCH_BIAS;
            }
            // Later wins on equality.
            if score >= best_score {
                best_score = score;
                best = i;
            }
        }

        // BOLA-O oscillation guard: an up-switch beyond what throughput can
        // sustain is clamped to max(current, sustainable).
        if let Some(bw) = bandwidth_bps {
            if self.reps[best].bitrate > self.reps[self.current].bitrate {
                let sustainable = self.sustainable_index(bw);
                if best > sustainable {
                    let clamped = self.current.max(sustainable);
                    debug!(
                        chosen = best,
                        sustainable, clamped, "BOLA-O clamped up-switch"
                    );
                    best = clamped;
                }
            }
        }

        // Overflow: consume placeholder first, then report the residual as a
        // download delay.
        let mut delay_secs = 0.0;
        let max_buffer = self.max_buffer_for_rep(best);
        if effective > max_buffer {
            let excess = effective - max_buffer;
            let consumed = excess.min(self.placeholder);
            self.placeholder -= consumed;
            delay_secs = excess - consumed;
        }

        self.current = best;
        BolaChoice {
            index: best,
            delay_secs,
        }
    }

    /// Highest representation sustainable at `0.9 * bandwidth`, the lowest
    /// one when even that is too rich.
    fn sustainable_index(&self, bandwidth_bps: u64) -> usize {
        let budget = bandwidth_bps as f64 * Self::SAFETY_FACTOR;
        let mut index = 0;
        for (i, rep) in self.reps.iter().enumerate() {
            if rep.bitrate as f64 <= budget {
                index = i;
            }
        }
        index
    }

    /// Account wall-clock time not spent downloading as virtual buffer, then
    /// clear the per-segment timestamps for the next cycle.
    fn update_placeholder(&mut self, now: Instant) {
        if let Some(finish) = self.last_segment_finish {
            self.placeholder += now.saturating_duration_since(finish).as_secs_f64();
        } else if let Some(call) = self.last_call {
            self.placeholder += now.saturating_duration_since(call).as_secs_f64();
        }
        self.last_segment_start = None;
        self.last_segment_request = None;
        self.last_segment_finish = None;
        self.last_call = Some(now);
        self.cap_placeholder();
    }

    fn cap_placeholder(&mut self) {
        let cap = (self.max_buffer_level - self.buffer_target).max(0.0);
        self.placeholder = self.placeholder.clamp(0.0, cap);
    }

    pub fn on_segment_download_begin(&mut self, now: Instant, segment_start: f64) {
        self.last_segment_request = Some(now);
        self.last_segment_start = Some(segment_start);
        self.most_advanced_start = Some(
            self.most_advanced_start
                .map_or(segment_start, |s| s.max(segment_start)),
        );
    }

    pub fn on_segment_download_end(
        &mut self,
        now: Instant,
        duration_secs: f64,
        is_replacement: bool,
    ) {
        self.last_segment_finish = Some(now);
        self.segment_count += 1;
        self.last_segment_duration = Some(duration_secs);
        self.last_was_replacement = is_replacement;
    }

    /// Rebuffer: back to startup picks.
    pub fn on_buffer_empty(&mut self) {
        if self.mode != BolaMode::OneBitrate {
            self.mode = BolaMode::Startup;
            self.segment_count = 0;
        }
    }

    /// Seek: restart with a clean placeholder and no per-segment timestamps.
    pub fn on_seek(&mut self) {
        if self.mode != BolaMode::OneBitrate {
            self.mode = BolaMode::Startup;
        }
        self.placeholder = 0.0;
        self.last_call = None;
        self.last_segment_request = None;
        self.last_segment_finish = None;
        self.last_segment_start = None;
        self.last_segment_duration = None;
        self.segment_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;
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

    fn ladder() -> Vec<Arc<Representation>> {
        vec![rep(0, 400), rep(1, 1000), rep(2, 3000), rep(3, 6000)]
    }

    fn controller() -> BolaController {
        let mut c = BolaController::new(&AbrOptions::default(), 60.0);
        c.init(ladder());
        c
    }

    #[test]
    fn utilities_are_log_scaled_from_one() {
        let c = controller();
        assert!((c.utilities[0] - 1.0).abs() < 1e-9);
        assert!((c.utilities[1] - (2.5f64.ln() + 1.0)).abs() < 1e-9);
        assert!((c.utilities[3] - (15f64.ln() + 1.0)).abs() < 1e-9);
    }

    #[test]
    fn gains_match_closed_form() {
        let c = controller();
        // bufferTime = max(12, 10 + 2*4) = 18
        let expected_gp = (15f64.ln() + 1.0 - 1.0) / (18.0 / 10.0 - 1.0);
        assert!((c.gp - expected_gp).abs() < 1e-9);
        assert!((c.vp - 10.0 / expected_gp).abs() < 1e-9);
    }

    #[test]
    fn reinit_with_same_set_is_noop_for_gains() {
        let mut c = controller();
        let (gp, vp, utilities) = (c.gp, c.vp, c.utilities.clone());
        c.init(ladder());
        assert_eq!(c.gp, gp);
        assert_eq!(c.vp, vp);
        assert_eq!(c.utilities, utilities);
    }

    #[test]
    fn min_buffer_is_monotone_in_index() {
        let c = controller();
        let levels: Vec<f64> = (0..4).map(|i| c.min_buffer_for_rep(i)).collect();
        assert_eq!(levels[0], 0.0);
        assert!(levels.windows(2).all(|w| w[0] <= w[1]), "{levels:?}");
    }

    #[rstest]
    #[case(Some(3_000_000), 1)] // 0.9 * 3 Mbps = 2.7 -> 1000 kbps
    #[case(Some(5_000_000), 2)] // 0.9 * 5 Mbps = 4.5 -> 3000 kbps
    #[case(Some(10_000_000), 3)]
    #[case(Some(300_000), 0)] // below every rung -> lowest
    #[case(None, 0)]
    fn startup_pick_follows_safe_throughput(
        #[case] bandwidth: Option<u64>,
        #[case] expected: usize,
    ) {
        let mut c = controller();
        let choice = c.choose(Instant::now(), 0.0, bandwidth);
        assert_eq!(c.mode(), BolaMode::Startup);
        assert_eq!(choice.index, expected);
    }

    #[test]
    fn startup_precharges_placeholder_to_threshold() {
        let mut c = controller();
        c.choose(Instant::now(), 1.0, Some(5_000_000));
        let expected = (c.min_buffer_for_rep(2) - 1.0).max(0.0);
        assert!((c.placeholder_buffer() - expected).abs() < 1e-9);
    }

    #[test]
    fn startup_persists_until_a_segment_completes() {
        let mut c = controller();
        let now = Instant::now();
        // Plenty of buffer, but no completed segment: stay in startup.
        c.choose(now, 20.0, Some(5_000_000));
        assert_eq!(c.mode(), BolaMode::Startup);

        c.on_segment_download_end(now, 4.0, false);
        c.choose(now, 20.0, Some(5_000_000));
        assert_eq!(c.mode(), BolaMode::SteadyState);
    }

    #[test]
    fn startup_does_not_end_below_one_segment_of_buffer() {
        let mut c = controller();
        let now = Instant::now();
        c.on_segment_download_end(now, 4.0, false);
        c.choose(now, 3.9, Some(5_000_000));
        assert_eq!(c.mode(), BolaMode::Startup);
    }

    fn steady(c: &mut BolaController, now: Instant) {
        c.on_segment_download_end(now, 4.0, false);
        c.choose(now, 10.0, Some(5_000_000));
        assert_eq!(c.mode(), BolaMode::SteadyState);
    }

    #[test]
    fn steady_state_prefers_low_quality_on_thin_buffer() {
        let mut c = controller();
        let now = Instant::now();
        steady(&mut c, now);
        let choice = c.choose(now, 1.0, Some(5_000_000));
        assert_eq!(choice.index, 0);
    }

    #[test]
    fn steady_state_climbs_with_buffer() {
        let mut c = controller();
        let now = Instant::now();
        steady(&mut c, now);
        let low = c.choose(now, 4.0, Some(50_000_000)).index;
        let high = c.choose(now, 16.0, Some(50_000_000)).index;
        assert!(high >= low);
        assert!(high >= 2, "16 s of buffer should sustain 3000 kbps: {high}");
    }

    #[test]
    fn oscillation_guard_clamps_unsustainable_up_switch() {
        let mut c = controller();
        let now = Instant::now();
        steady(&mut c, now);
        // Park at index 1 with modest buffer.
        let base = c.choose(now, 9.0, Some(2_000_000)).index;
        // Huge buffer makes BOLA want the top rung, but throughput only
        // sustains index 1 (0.9 * 2 Mbps = 1.8 Mbps).
        let choice = c.choose(now, 17.0, Some(2_000_000));
        assert!(choice.index <= base.max(1));
    }

    #[test]
    fn overflow_consumes_placeholder_then_reports_delay() {
        let mut c = controller();
        let now = Instant::now();
        steady(&mut c, now);
        c.placeholder = 5.0;
        let choice = c.choose(now, 89.0, Some(50_000_000));
        // effective 94 > max 90 for the top rung: 4 excess, 4 from the
        // placeholder, no residual delay.
        assert!(c.placeholder_buffer() <= 1.0 + 1e-9);
        assert_eq!(choice.delay_secs, 0.0);

        c.placeholder = 0.0;
        let choice = c.choose(now, 92.0, Some(50_000_000));
        assert!(choice.delay_secs >= 2.0 - 1e-9, "{}", choice.delay_secs);
    }

    #[test]
    fn placeholder_grows_with_idle_time_and_is_capped() {
        let mut c = controller();
        let t0 = Instant::now();
        steady(&mut c, t0);
        c.on_segment_download_end(t0, 4.0, false);

        let t1 = t0 + Duration::from_secs(3);
        c.choose(t1, 10.0, Some(5_000_000));
        assert!(c.placeholder_buffer() >= 3.0 - 1e-6);

        // Cap: max_buffer_level - buffer_target = 90 - 60 = 30.
        let t2 = t1 + Duration::from_secs(500);
        c.choose(t2, 10.0, Some(5_000_000));
        assert!(c.placeholder_buffer() <= 30.0 + 1e-9);
    }

    #[test]
    fn seek_resets_to_startup_with_zero_placeholder() {
        let mut c = controller();
        let now = Instant::now();
        steady(&mut c, now);
        c.placeholder = 12.0;
        c.on_seek();
        assert_eq!(c.mode(), BolaMode::Startup);
        assert_eq!(c.placeholder_buffer(), 0.0);
        assert_eq!(c.segment_count(), 0);
    }

    #[test]
    fn buffer_empty_restarts_startup() {
        let mut c = controller();
        let now = Instant::now();
        steady(&mut c, now);
        c.on_buffer_empty();
        assert_eq!(c.mode(), BolaMode::Startup);
    }

    #[test]
    fn single_representation_is_sticky() {
        let mut c = BolaController::new(&AbrOptions::default(), 60.0);
        c.init(vec![rep(0, 800)]);
        assert_eq!(c.mode(), BolaMode::OneBitrate);
        let choice = c.choose(Instant::now(), 50.0, Some(100));
        assert_eq!(choice.index, 0);
        assert_eq!(c.mode(), BolaMode::OneBitrate);
    }

    #[test]
    fn placeholder_invariant_holds_across_random_walk() {
        let mut c = controller();
        let mut now = Instant::now();
        steady(&mut c, now);
        let cap = 90.0 - 60.0;
        for step in 0..50u64 {
            now += Duration::from_millis(250 + (step * 37) % 900);
            let buffer = (step as f64 * 1.7) % 80.0;
            let bw = 500_000 + (step * 123_457) % 8_000_000;
            c.choose(now, buffer, Some(bw));
            assert!(c.placeholder_buffer() >= 0.0);
            assert!(c.placeholder_buffer() <= cap + 1e-9);
        }
    }
}
