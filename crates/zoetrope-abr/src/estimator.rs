use std::time::Duration;

use zoetrope_core::NetworkHint;

/// Exponentially weighted moving average with zero-bias correction.
#[derive(Clone, Debug)]
struct Ewma {
    alpha: f64,
    estimate: f64,
    total_weight: f64,
}

impl Ewma {
    fn new(half_life_secs: f64) -> Self {
        Self {
            alpha: f64::exp(0.5_f64.ln() / half_life_secs.max(0.001)),
            estimate: 0.0,
            total_weight: 0.0,
        }
    }

    fn add_sample(&mut self, weight: f64, value: f64) {
        let adj_alpha = self.alpha.powf(weight.max(0.0));
        self.estimate = value * (1.0 - adj_alpha) + adj_alpha * self.estimate;
        self.total_weight += weight.max(0.0);
    }

    fn get(&self) -> f64 {
        if self.total_weight <= 0.0 {
            return 0.0;
        }
        let zero_factor = 1.0 - self.alpha.powf(self.total_weight);
        self.estimate / zero_factor.max(1e-6)
    }

    fn reset(&mut self) {
        self.estimate = 0.0;
        self.total_weight = 0.0;
    }
}

/// Dual-EWMA bandwidth estimator.
///
/// The fast average (2 s half-life) reacts to drops, the slow one (5 s)
/// damps spikes; the reported estimate is `min(fast, slow)` so the player
/// adapts down quickly and up slowly. While fewer than
/// [`Self::MIN_TOTAL_BYTES`] have been sampled the estimate falls back to
/// the platform network hint (or a configured default), and once real
/// samples exist the hint is blended out as `max(0.1, exp(-n/5))`.
#[derive(Clone, Debug)]
pub struct BandwidthEstimator {
    fast: Ewma,
    slow: Ewma,
    sample_count: u64,
    bytes_sampled: u64,
    default_bps: f64,
    hint: Option<NetworkHint>,
}

impl BandwidthEstimator {
    const FAST_HALF_LIFE_SECS: f64 = 2.0;
    const SLOW_HALF_LIFE_SECS: f64 = 5.0;
    /// Samples smaller than this are dominated by first-byte latency.
    const MIN_BYTES: u64 = 16 * 1024;
    /// Below this total the estimator keeps reporting the fallback.
    const MIN_TOTAL_BYTES: u64 = 128 * 1024;

    pub fn new(default_bps: u64) -> Self {
        Self {
            fast: Ewma::new(Self::FAST_HALF_LIFE_SECS),
            slow: Ewma::new(Self::SLOW_HALF_LIFE_SECS),
            sample_count: 0,
            bytes_sampled: 0,
            default_bps: default_bps as f64,
            hint: None,
        }
    }

    /// Record a download sample. Silently ignores degenerate inputs and
    /// transfers below [`Self::MIN_BYTES`].
    pub fn sample(&mut self, duration: Duration, bytes: u64) {
        let duration_ms = duration.as_secs_f64() * 1000.0;
        if !(duration_ms > 0.0) || !duration_ms.is_finite() || bytes == 0 {
            return;
        }
        if bytes < Self::MIN_BYTES {
            return;
        }

        let bps = bytes as f64 * 8000.0 / duration_ms;
        let weight = duration_ms / 1000.0;

        self.fast.add_sample(weight, bps);
        self.slow.add_sample(weight, bps);
        self.sample_count += 1;
        self.bytes_sampled = self.bytes_sampled.saturating_add(bytes);
    }

    /// Current estimate in bits per second.
    pub fn estimate_bps(&self) -> u64 {
        let fallback = self
            .hint
            .map_or(self.default_bps, |h| h.downlink_bps)
            .max(0.0);

        if self.bytes_sampled < Self::MIN_TOTAL_BYTES {
            return fallback.round() as u64;
        }

        let measured = self.fast.get().min(self.slow.get());
        let blended = match self.hint {
            Some(hint) => {
                let w = f64::exp(-(self.sample_count as f64) / 5.0).max(0.1);
                w * hint.downlink_bps + (1.0 - w) * measured
            }
            None => measured,
        };
        blended.round() as u64
    }

    /// Total accepted sample count since the last reset.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Install a new network hint; a significant change (carrier class,
    /// downlink delta > 20 %, RTT delta > 100 ms) resets measured state.
    pub fn update_hint(&mut self, hint: NetworkHint) {
        let significant = self
            .hint
            .as_ref()
            .is_some_and(|old| hint.is_significant_change(old));
        self.hint = Some(hint);
        if significant {
            tracing::debug!(
                downlink_bps = hint.downlink_bps,
                rtt_ms = hint.rtt.as_millis() as u64,
                "significant network change, resetting bandwidth estimator"
            );
            self.reset();
        }
    }

    /// Zero measured state; the EWMAs keep their half-lives, the hint is
    /// kept.
    pub fn reset(&mut self) {
        self.fast.reset();
        self.slow.reset();
        self.sample_count = 0;
        self.bytes_sampled = 0;
    }
}
