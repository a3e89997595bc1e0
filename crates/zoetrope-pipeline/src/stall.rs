use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

use tracing::debug;
use zoetrope_core::StallOptions;

/// Player context, selecting the grace period before a frozen playhead may
/// count as a stall.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlayerContext {
    Startup,
    Seeking,
    QualitySwitching,
    Normal,
    Buffering,
}

impl PlayerContext {
    fn grace(self) -> Duration {
        match self {
            Self::Startup | Self::Seeking => Duration::from_millis(2000),
            Self::QualitySwitching => Duration::from_millis(1500),
            Self::Normal => Duration::ZERO,
            Self::Buffering => Duration::from_millis(3000),
        }
    }
}

/// One playback-position observation, taken at 10 Hz.
#[derive(Clone, Copy, Debug)]
pub struct StallSample {
    pub position: f64,
    pub paused: bool,
    pub seeking: bool,
    pub ended: bool,
    /// Whether the sink reports the playhead inside a buffered range.
    pub playhead_buffered: bool,
    /// Whether a download currently in flight covers the playhead.
    pub download_covers_playhead: bool,
}

/// Confirms real stalls from position samples.
///
/// A sample is a stall *candidate* when playback should be progressing, the
/// context grace period is over and the position has not moved. A frozen
/// playhead with nothing buffered while the covering download is still in
/// flight is an ordinary rebuffer and is suppressed. Confirmation requires
/// consecutive candidates spanning the stall threshold plus a 2-of-3 history
/// vote.
#[derive(Debug)]
pub struct StallDetector {
    opts: StallOptions,
    context: PlayerContext,
    context_since: Option<Instant>,
    last_position: f64,
    last_progress_at: Option<Instant>,
    consecutive: u32,
    history: VecDeque<bool>,
    confirmed: bool,
}

impl StallDetector {
    const PROGRESS_EPSILON: f64 = 0.01;
    const HISTORY_LEN: usize = 3;

    pub fn new(opts: StallOptions) -> Self {
        Self {
            opts,
            context: PlayerContext::Startup,
            context_since: None,
            last_position: 0.0,
            last_progress_at: None,
            consecutive: 0,
            history: VecDeque::new(),
            confirmed: false,
        }
    }

    pub fn set_context(&mut self, context: PlayerContext, now: Instant) {
        if self.context != context {
            debug!(?context, "stall detector context change");
            self.context = context;
            self.context_since = Some(now);
        }
    }

    pub fn context(&self) -> PlayerContext {
        self.context
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Forget the current stall (after the gap handler acted on it).
    pub fn reset(&mut self, now: Instant) {
        self.consecutive = 0;
        self.history.clear();
        self.confirmed = false;
        self.last_progress_at = Some(now);
    }

    /// Feed one sample. Returns `true` when this sample newly confirms a
    /// stall.
    pub fn sample(&mut self, now: Instant, sample: StallSample) -> bool {
        if sample.paused || sample.seeking || sample.ended {
            self.note_progress(now, sample.position);
            return false;
        }

        let progressed = (sample.position - self.last_position).abs() >= Self::PROGRESS_EPSILON;
        if progressed {
            self.note_progress(now, sample.position);
            return false;
        }

        // Grace period after entering the current context.
        if let Some(since) = self.context_since {
            if now.saturating_duration_since(since) < self.context.grace() {
                self.push_history(false);
                return false;
            }
        } else {
            self.context_since = Some(now);
        }

        // Need at least 100 ms of observed standstill before counting.
        let stalled_for = match self.last_progress_at {
            Some(at) => now.saturating_duration_since(at),
            None => {
                self.last_progress_at = Some(now);
                return false;
            }
        };
        if stalled_for < Duration::from_millis(100) {
            self.push_history(false);
            return false;
        }

        // Ordinary rebuffer: the data simply has not arrived yet.
        if !sample.playhead_buffered && sample.download_covers_playhead {
            self.push_history(false);
            self.consecutive = 0;
            return false;
        }

        self.consecutive += 1;
        self.push_history(true);

        let was_confirmed = self.confirmed;
        let votes = self
            .history
            .iter()
            .rev()
            .take(Self::HISTORY_LEN)
            .filter(|&&s| s)
            .count();
        if self.consecutive >= self.opts.consecutive_checks_threshold
            && stalled_for >= self.opts.stall_threshold
            && votes >= 2
        {
            self.confirmed = true;
        }

        if self.confirmed && !was_confirmed {
            debug!(
                position = sample.position,
                stalled_ms = stalled_for.as_millis() as u64,
                "stall confirmed"
            );
        }
        self.confirmed && !was_confirmed
    }

    fn note_progress(&mut self, now: Instant, position: f64) {
        self.last_position = position;
        self.last_progress_at = Some(now);
        self.consecutive = 0;
        self.confirmed = false;
        self.push_history(false);
    }

    fn push_history(&mut self, stalled: bool) {
        self.history.push_back(stalled);
        while self.history.len() > Self::HISTORY_LEN {
            self.history.pop_front();
        }
    }
}
