use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures::{FutureExt, StreamExt, future::BoxFuture, stream::FuturesUnordered};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;
use zoetrope_abr::{BandwidthEstimator, SwitchReason};
use zoetrope_core::{BufferOptions, BufferedSegmentInfo, Representation, TrackKind};
use zoetrope_events::{AbrEvent, EventBus, PipelineEvent};
use zoetrope_net::{FetchResponse, Fetcher, NetError, NetResult};
use zoetrope_sink::{MediaSink, SinkError, SinkFactory, SinkState, TimeRanges, TimeSpan};

use crate::{
    blacklist::Blacklist,
    buffered::{BufferedSegmentMap, effective_buffer_level},
    error::{PipelineError, PipelineResult},
};

/// An in-flight segment download.
#[derive(Debug)]
struct DownloadTask {
    segment_number: u64,
    span: TimeSpan,
    url: Url,
    representation: Arc<Representation>,
    started: Instant,
    cancel: CancellationToken,
    is_replacement: bool,
}

/// Raw completion of a download future; task metadata stays in the active
/// map until consumed.
#[derive(Debug)]
pub struct DownloadOutcome {
    task_id: u64,
    result: NetResult<FetchResponse>,
}

/// Downloaded bytes (possibly empty for a skip marker) waiting to be
/// appended in segment-number order.
#[derive(Debug)]
struct QueuedSegment {
    bytes: Bytes,
    span: TimeSpan,
    representation: Arc<Representation>,
}

/// Downloaded replacement bytes targeting an already-buffered segment.
#[derive(Debug)]
struct ReplacementTask {
    segment_number: u64,
    bytes: Bytes,
    span: TimeSpan,
    representation: Arc<Representation>,
}

/// Dispatch notification handed back to the caller so BOLA's lifecycle hooks
/// can run.
#[derive(Clone, Copy, Debug)]
pub struct StartedDownload {
    pub segment_number: u64,
    pub segment_start: f64,
    pub is_replacement: bool,
}

/// Completion notification for the same purpose.
#[derive(Clone, Copy, Debug)]
pub struct CompletedDownload {
    pub segment_number: u64,
    pub duration_secs: f64,
    pub is_replacement: bool,
}

/// Segment download/append pipeline for one track.
///
/// Owns the media sink, the download set, the append and replacement queues
/// and the buffered-segment map. All methods are driven from one task; every
/// sink operation runs to completion before the next one starts.
pub struct SegmentPipeline {
    kind: TrackKind,
    opts: BufferOptions,
    events: EventBus,
    fetcher: Arc<dyn Fetcher>,
    estimator: Arc<Mutex<BandwidthEstimator>>,
    sink_factory: Box<dyn SinkFactory>,
    sink: Option<Box<dyn MediaSink>>,
    current: Option<Arc<Representation>>,

    downloads: FuturesUnordered<BoxFuture<'static, DownloadOutcome>>,
    active: HashMap<u64, DownloadTask>,
    next_task_id: u64,

    next_to_download: Option<u64>,
    next_to_append: Option<u64>,
    append_queue: BTreeMap<u64, QueuedSegment>,
    replacement_queue: VecDeque<ReplacementTask>,
    replacing: HashSet<u64>,
    buffered: BufferedSegmentMap,
    blacklist: Blacklist,

    streaming_active: bool,
    buffering_target: f64,
    critical_level: Option<f64>,
    quota_in_progress: bool,
    quota_quiesce_until: Option<Instant>,
}

impl SegmentPipeline {
    /// Admission safety margin on top of the committed duration.
    const SAFETY_MARGIN_SECS: f64 = 2.0;
    /// Minimum fetch duration for a bandwidth sample.
    const MIN_SAMPLE_DURATION: Duration = Duration::from_millis(50);
    /// Samples implying more than this are measurement artifacts.
    const MAX_PLAUSIBLE_BPS: f64 = 1_000_000_000.0;
    /// Gap width the buffer-level computation bridges.
    const LEVEL_GAP_TOLERANCE: f64 = 1.5;
    /// Failures at or beyond this share of the segment timeout blacklist
    /// the segment number.
    const TIMEOUT_BLACKLIST_SHARE: f64 = 0.8;
    const QUOTA_QUIESCE: Duration = Duration::from_secs(2);

    pub fn new(
        kind: TrackKind,
        opts: BufferOptions,
        fetcher: Arc<dyn Fetcher>,
        sink_factory: Box<dyn SinkFactory>,
        estimator: Arc<Mutex<BandwidthEstimator>>,
        events: EventBus,
    ) -> Self {
        let buffering_target = opts.buffering_target;
        Self {
            kind,
            opts,
            events,
            fetcher,
            estimator,
            sink_factory,
            sink: None,
            current: None,
            downloads: FuturesUnordered::new(),
            active: HashMap::new(),
            next_task_id: 0,
            next_to_download: None,
            next_to_append: None,
            append_queue: BTreeMap::new(),
            replacement_queue: VecDeque::new(),
            replacing: HashSet::new(),
            buffered: BufferedSegmentMap::new(),
            blacklist: Blacklist::new(),
            streaming_active: false,
            buffering_target,
            critical_level: None,
            quota_in_progress: false,
            quota_quiesce_until: None,
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn set_streaming_active(&mut self, active: bool) {
        self.streaming_active = active;
    }

    pub fn buffering_target(&self) -> f64 {
        self.buffering_target
    }

    pub fn current_representation(&self) -> Option<&Arc<Representation>> {
        self.current.as_ref()
    }

    pub fn has_active_downloads(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn buffered_ranges(&self) -> TimeRanges {
        self.sink
            .as_ref()
            .map(|s| s.buffered())
            .unwrap_or_default()
    }

    /// Effective buffer level ahead of `playhead`, bridging jumpable gaps.
    pub fn buffer_level(&self, playhead: f64) -> f64 {
        effective_buffer_level(
            &self.buffered_ranges(),
            playhead,
            self.buffering_target,
            Self::LEVEL_GAP_TOLERANCE,
        )
    }

    pub fn is_position_buffered(&self, position: f64) -> bool {
        self.buffered_ranges().contains(position)
    }

    /// Whether an in-flight download covers `position`.
    pub fn download_covers(&self, position: f64) -> bool {
        self.active.values().any(|t| t.span.contains(position))
    }

    /// Average segment duration of the active representation.
    pub fn average_segment_duration(&self) -> f64 {
        self.current
            .as_ref()
            .map_or(0.0, |r| r.index.average_duration())
    }

    /// Switch the pipeline to `rep` (§ representation change).
    ///
    /// First call creates the sink and appends the init segment; later calls
    /// reconfigure or recreate the sink, cancel pending work and re-fetch the
    /// new init segment.
    pub async fn apply_representation(
        &mut self,
        rep: Arc<Representation>,
        reason: SwitchReason,
        playhead: f64,
    ) -> PipelineResult<()> {
        if let Some(current) = &self.current {
            if current.id == rep.id {
                return Ok(());
            }
        }

        let previous_bitrate = self.current.as_ref().map(|r| r.bitrate);

        if self.sink.is_none() {
            let sink = self
                .sink_factory
                .open(&rep.mime_type, &rep.codecs)
                .map_err(PipelineError::SinkOpen)?;
            self.sink = Some(sink);
            let start = rep
                .index
                .at(playhead)
                .or_else(|| rep.index.first())
                .map(|r| r.number);
            self.next_to_download = start;
            self.next_to_append = start;
        } else {
            self.cancel_all_downloads();
            self.append_queue.clear();
            self.replacement_queue.clear();
            self.replacing.clear();
            self.next_to_download = self.next_to_append;

            let reconfigured = match &mut self.sink {
                Some(sink) => sink
                    .change_type(&rep.mime_type, &rep.codecs)
                    .map_err(PipelineError::SinkUnusable)?,
                None => false,
            };
            if !reconfigured {
                debug!(kind = %self.kind, "sink cannot change type, recreating");
                if let Some(mut old) = self.sink.take() {
                    let _ = old.close().await;
                }
                let sink = self
                    .sink_factory
                    .open(&rep.mime_type, &rep.codecs)
                    .map_err(PipelineError::SinkOpen)?;
                self.sink = Some(sink);
                // The recreated sink is empty; everything must be refetched.
                self.buffered.clear();
                let start = rep
                    .index
                    .at(playhead)
                    .or_else(|| rep.index.first())
                    .map(|r| r.number);
                self.next_to_download = start;
                self.next_to_append = start;
            }
        }

        self.append_init_segment(&rep).await?;

        debug!(
            kind = %self.kind,
            representation = %rep.id,
            bitrate = rep.bitrate,
            ?reason,
            "representation applied"
        );

        let event = match self.kind {
            TrackKind::Video => AbrEvent::VideoBitrateChanged {
                representation: rep.id,
                bitrate: rep.bitrate,
                reason,
            },
            TrackKind::Audio => AbrEvent::AudioBitrateChanged {
                representation: rep.id,
                bitrate: rep.bitrate,
                reason,
            },
        };
        self.events.publish(event);

        let is_upswitch = previous_bitrate.is_some_and(|b| rep.bitrate > b);
        self.current = Some(rep);
        if is_upswitch && self.opts.fast_switching_enabled {
            trace!(kind = %self.kind, "up-switch, replacement candidates eligible");
        }
        Ok(())
    }

    async fn append_init_segment(&mut self, rep: &Arc<Representation>) -> PipelineResult<()> {
        let Some(init_url) = rep.init_url.clone() else {
            return Ok(());
        };
        let cancel = CancellationToken::new();
        match self.fetcher.fetch(init_url.clone(), cancel).await {
            Ok(response) => {
                let Some(sink) = &mut self.sink else {
                    return Err(PipelineError::NoRepresentation);
                };
                // Init bytes carry no media time.
                sink.append(response.bytes, TimeSpan::new(0.0, 0.0))
                    .await
                    .map_err(PipelineError::SinkUnusable)?;
                Ok(())
            }
            Err(e) => {
                // The next tick retries by reapplying; transient by policy.
                warn!(kind = %self.kind, url = %init_url, error = %e, "init segment fetch failed");
                Ok(())
            }
        }
    }

    /// Drive the append queue, then launch downloads while admission allows
    /// (§ download dispatch). Returns dispatch notifications for BOLA.
    pub async fn load_next(
        &mut self,
        now: Instant,
        playhead: f64,
        level_cap: Option<f64>,
    ) -> PipelineResult<Vec<StartedDownload>> {
        self.process_append_queue(playhead).await?;
        self.process_replacements(playhead).await?;

        let mut started = Vec::new();
        if self.current.is_none() {
            return Ok(started);
        }

        // Replacements first: their deadlines are buffered playback
        // positions, which regular lookahead downloads can afford to wait
        // behind.
        if self.opts.fast_switching_enabled {
            started.extend(self.dispatch_replacements(now, playhead));
        }

        while self.should_start_new_download(now, playhead, level_cap) {
            match self.dispatch_next_segment(now) {
                Some(dispatch) => started.push(dispatch),
                None => break,
            }
        }

        Ok(started)
    }

    fn should_start_new_download(
        &self,
        now: Instant,
        playhead: f64,
        level_cap: Option<f64>,
    ) -> bool {
        if !self.streaming_active || self.quota_in_progress {
            return false;
        }
        if self
            .quota_quiesce_until
            .is_some_and(|until| now < until)
        {
            return false;
        }
        let Some(sink) = &self.sink else {
            return false;
        };

        if sink.is_managed() {
            return self.active.is_empty();
        }

        // Replacements share the download slots; they only bypass the
        // committed-duration admission below.
        if self.active.len() >= self.opts.max_concurrent_downloads {
            return false;
        }

        let target = level_cap.map_or(self.buffering_target, |cap| cap.min(self.buffering_target));
        let remaining = target - self.buffer_level(playhead);
        if remaining <= 0.0 {
            return false;
        }
        self.committed_duration() + Self::SAFETY_MARGIN_SECS <= remaining
    }

    /// Seconds of media already promised: queued for append plus in regular
    /// flight. Replacements displace buffered media instead of adding to it.
    fn committed_duration(&self) -> f64 {
        let queued: f64 = self.append_queue.values().map(|q| q.span.duration()).sum();
        let active: f64 = self
            .active
            .values()
            .filter(|t| !t.is_replacement)
            .map(|t| t.span.duration())
            .sum();
        queued + active
    }

    /// Select and dispatch the next segment number (§ selection). Skip
    /// markers for blacklisted segments are enqueued inline.
    fn dispatch_next_segment(&mut self, now: Instant) -> Option<StartedDownload> {
        let rep = Arc::clone(self.current.as_ref()?);
        let last_number = rep.index.last()?.number;
        let mut number = self.next_to_download?;

        loop {
            if number > last_number {
                return None;
            }
            let in_flight = self
                .active
                .values()
                .any(|t| !t.is_replacement && t.segment_number == number);
            if in_flight || self.append_queue.contains_key(&number) || self.buffered.contains(number)
            {
                number += 1;
                continue;
            }
            break;
        }

        let reference = rep.index.by_number(number)?;
        let url = reference.uri();
        let span = TimeSpan::new(reference.start, reference.end);

        if self.blacklist.is_banned(&url, number) {
            trace!(kind = %self.kind, number, "segment blacklisted, queueing skip marker");
            self.append_queue.insert(
                number,
                QueuedSegment {
                    bytes: Bytes::new(),
                    span,
                    representation: Arc::clone(&rep),
                },
            );
            return Some(StartedDownload {
                segment_number: number,
                segment_start: span.start,
                is_replacement: false,
            });
        }

        self.spawn_download(rep, number, span, url, false, now);
        Some(StartedDownload {
            segment_number: number,
            segment_start: span.start,
            is_replacement: false,
        })
    }

    /// Launch replacement downloads for buffered low-bitrate segments ahead
    /// of the playhead (§ fast-switch), earliest deadline first.
    fn dispatch_replacements(&mut self, now: Instant, playhead: f64) -> Vec<StartedDownload> {
        let mut started = Vec::new();
        let Some(rep) = self.current.clone() else {
            return started;
        };
        if self.quota_in_progress || !self.streaming_active {
            return started;
        }

        let horizon =
            playhead + self.average_segment_duration() * self.opts.replacement_safety_factor;
        let candidates: Vec<u64> = self
            .buffered
            .replacement_candidates(playhead, horizon, rep.bitrate)
            .iter()
            .map(|c| c.number)
            .filter(|n| !self.replacing.contains(n))
            .collect();

        for number in candidates {
            if self.active.len() >= self.opts.max_concurrent_downloads {
                break;
            }
            let Some(reference) = rep.index.by_number(number) else {
                continue;
            };
            let url = reference.uri();
            if self.blacklist.is_url_banned(&url) {
                continue;
            }
            let span = TimeSpan::new(reference.start, reference.end);
            self.replacing.insert(number);
            self.spawn_download(Arc::clone(&rep), number, span, url, true, now);
            started.push(StartedDownload {
                segment_number: number,
                segment_start: span.start,
                is_replacement: true,
            });
        }
        started
    }

    fn spawn_download(
        &mut self,
        rep: Arc<Representation>,
        number: u64,
        span: TimeSpan,
        url: Url,
        is_replacement: bool,
        now: Instant,
    ) {
        let task_id = self.next_task_id;
        self.next_task_id += 1;

        let cancel = CancellationToken::new();
        let fetcher = Arc::clone(&self.fetcher);
        let token = cancel.clone();
        let timeout = self.opts.segment_timeout;
        let fetch_url = url.clone();
        let future = async move {
            let result = match tokio::time::timeout(timeout, fetcher.fetch(fetch_url, token)).await
            {
                Ok(result) => result,
                Err(_) => Err(NetError::Timeout),
            };
            DownloadOutcome { task_id, result }
        };
        self.downloads.push(future.boxed());

        self.events.publish(PipelineEvent::FragmentLoadingStarted {
            kind: self.kind,
            representation: rep.id,
            segment_number: number,
            is_replacement,
        });
        trace!(kind = %self.kind, number, is_replacement, url = %url, "download dispatched");

        self.active.insert(
            task_id,
            DownloadTask {
                segment_number: number,
                span,
                url,
                representation: rep,
                started: now,
                cancel,
                is_replacement,
            },
        );
    }

    /// Await the next download completion. Resolves to `None` immediately
    /// when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<DownloadOutcome> {
        self.downloads.next().await
    }

    /// Fold a completed download into pipeline state (§ fetch contract,
    /// blacklist, overrun discard).
    pub fn on_download_complete(
        &mut self,
        outcome: DownloadOutcome,
        now: Instant,
        playhead: f64,
    ) -> Option<CompletedDownload> {
        let task = self.active.remove(&outcome.task_id)?;
        if task.is_replacement {
            self.replacing.remove(&task.segment_number);
        }

        match outcome.result {
            Ok(response) => self.on_fetch_success(task, response, playhead),
            Err(NetError::Cancelled) => {
                trace!(kind = %self.kind, number = task.segment_number, "download cancelled");
                None
            }
            Err(error) => {
                self.on_fetch_failure(task, error, now);
                None
            }
        }
    }

    fn on_fetch_success(
        &mut self,
        task: DownloadTask,
        response: FetchResponse,
        playhead: f64,
    ) -> Option<CompletedDownload> {
        self.record_throughput(&response);

        let stale = self
            .current
            .as_ref()
            .is_none_or(|rep| rep.id != task.representation.id);
        let overrun = !task.is_replacement
            && self.buffer_level(playhead)
                > self.buffering_target + self.opts.max_allowed_overrun;

        let (discarded, reason) = if stale {
            (true, Some("stale-representation".to_string()))
        } else if overrun {
            (true, Some("buffer-overrun".to_string()))
        } else {
            (false, None)
        };

        self.events.publish(PipelineEvent::FragmentLoadingCompleted {
            kind: self.kind,
            representation: task.representation.id,
            segment_number: task.segment_number,
            status: response.status,
            duration: response.elapsed,
            from_cache: response.is_cache_hit(),
            transferred_bytes: response.transferred_bytes,
            resource_bytes: response.resource_bytes,
            is_replacement: task.is_replacement,
            discarded,
            reason,
        });

        if discarded {
            if overrun && !stale {
                // The segment must be refetched once there is room again.
                if let Some(next) = self.next_to_download {
                    self.next_to_download = Some(next.min(task.segment_number));
                }
            }
            return None;
        }

        let completed = CompletedDownload {
            segment_number: task.segment_number,
            duration_secs: task.span.duration(),
            is_replacement: task.is_replacement,
        };

        if task.is_replacement {
            self.replacing.insert(task.segment_number);
            self.replacement_queue.push_back(ReplacementTask {
                segment_number: task.segment_number,
                bytes: response.bytes,
                span: task.span,
                representation: task.representation,
            });
        } else {
            self.append_queue.insert(
                task.segment_number,
                QueuedSegment {
                    bytes: response.bytes,
                    span: task.span,
                    representation: task.representation,
                },
            );
        }
        Some(completed)
    }

    fn on_fetch_failure(&mut self, task: DownloadTask, error: NetError, now: Instant) {
        let elapsed = now.saturating_duration_since(task.started);
        let near_timeout = elapsed.as_secs_f64()
            >= Self::TIMEOUT_BLACKLIST_SHARE * self.opts.segment_timeout.as_secs_f64();

        let status = match &error {
            NetError::Status { status } => *status,
            _ => 0,
        };
        self.events.publish(PipelineEvent::FragmentLoadingCompleted {
            kind: self.kind,
            representation: task.representation.id,
            segment_number: task.segment_number,
            status,
            duration: elapsed,
            from_cache: false,
            transferred_bytes: 0,
            resource_bytes: 0,
            is_replacement: task.is_replacement,
            discarded: true,
            reason: Some(error.to_string()),
        });

        if task.is_replacement {
            // Replacements are opportunistic; a failure just leaves the old
            // bytes in place.
            debug!(kind = %self.kind, number = task.segment_number, error = %error, "replacement fetch failed");
            return;
        }

        if error.is_not_found() {
            debug!(kind = %self.kind, number = task.segment_number, url = %task.url, "404, blacklisting url");
            self.blacklist.ban_url(task.url);
            self.queue_skip_marker(task.segment_number, task.span, task.representation);
        } else if near_timeout {
            debug!(
                kind = %self.kind,
                number = task.segment_number,
                elapsed_ms = elapsed.as_millis() as u64,
                "failure near segment timeout, blacklisting number"
            );
            self.blacklist.ban_number(task.segment_number);
            self.queue_skip_marker(task.segment_number, task.span, task.representation);
        } else {
            // Transient: the next tick redispatches the same number.
            debug!(kind = %self.kind, number = task.segment_number, error = %error, "transient download failure");
        }
    }

    fn queue_skip_marker(&mut self, number: u64, span: TimeSpan, rep: Arc<Representation>) {
        self.append_queue.insert(
            number,
            QueuedSegment {
                bytes: Bytes::new(),
                span,
                representation: rep,
            },
        );
    }

    fn record_throughput(&self, response: &FetchResponse) {
        if response.is_cache_hit() {
            return;
        }
        if response.elapsed < Self::MIN_SAMPLE_DURATION {
            return;
        }
        let bps = response.transferred_bytes as f64 * 8.0 / response.elapsed.as_secs_f64();
        if bps > Self::MAX_PLAUSIBLE_BPS {
            return;
        }
        self.estimator
            .lock()
            .sample(response.elapsed, response.transferred_bytes);
    }

    /// Append queued segments in segment-number order (§ append queue).
    pub async fn process_append_queue(&mut self, playhead: f64) -> PipelineResult<()> {
        loop {
            if self.quota_in_progress || self.append_queue.is_empty() {
                return Ok(());
            }
            match self.sink.as_ref().map(|s| s.state()) {
                Some(SinkState::Open) => {}
                Some(state) => {
                    warn!(kind = %self.kind, %state, "sink not open, halting appends");
                    return Err(PipelineError::SinkUnusable(SinkError::InvalidState(
                        state.to_string(),
                    )));
                }
                None => return Ok(()),
            }
            let Some(expected) = self.next_to_append else {
                return Ok(());
            };

            let Some(entry) = self.append_queue.remove(&expected) else {
                let all_greater = self.append_queue.keys().all(|&n| n > expected);
                if all_greater && self.append_queue.len() > 3 {
                    // The expected segment was lost out of band (failed and
                    // blacklisted, discarded): resynchronize.
                    debug!(
                        kind = %self.kind,
                        expected,
                        queued = self.append_queue.len(),
                        "expected segment lost, resetting append queue"
                    );
                    self.append_queue.clear();
                    self.next_to_append = self.next_to_download;
                }
                return Ok(());
            };

            if entry.bytes.is_empty() {
                // Skip marker: advance past the blacklisted segment.
                self.next_to_append = Some(expected + 1);
                if self.next_to_download.is_some_and(|n| n < expected + 1) {
                    self.next_to_download = Some(expected + 1);
                }
                continue;
            }

            let byte_size = entry.bytes.len();
            let Some(sink) = self.sink.as_mut() else {
                return Ok(());
            };
            match sink.append(entry.bytes.clone(), entry.span).await {
                Ok(()) => {
                    self.buffered.insert(BufferedSegmentInfo {
                        number: expected,
                        start: entry.span.start,
                        end: entry.span.end,
                        representation: entry.representation.id,
                        bitrate: entry.representation.bitrate,
                        byte_size,
                    });
                    self.next_to_append = Some(expected + 1);
                    if self.next_to_download.is_some_and(|n| n < expected + 1) {
                        self.next_to_download = Some(expected + 1);
                    }
                    self.sync_buffered_segments();
                    self.publish_buffer_level(playhead);
                }
                Err(SinkError::QuotaExceeded) => {
                    // Put the entry back and run recovery.
                    self.append_queue.insert(expected, entry);
                    self.handle_quota_exceeded(Instant::now(), playhead).await?;
                    return Ok(());
                }
                Err(SinkError::InvalidState(state)) => {
                    return Err(PipelineError::SinkUnusable(SinkError::InvalidState(state)));
                }
                Err(SinkError::Closed) => {
                    return Err(PipelineError::SinkUnusable(SinkError::Closed));
                }
                Err(error) => {
                    // Bad segment: drop it and move on.
                    warn!(kind = %self.kind, number = expected, error = %error, "append failed, skipping segment");
                    self.next_to_append = Some(expected + 1);
                }
            }
        }
    }

    /// Serially apply queued replacements: remove the old byte range, append
    /// the new bytes, update bookkeeping (§ fast-switch).
    pub async fn process_replacements(&mut self, playhead: f64) -> PipelineResult<()> {
        while let Some(task) = self.replacement_queue.pop_front() {
            self.replacing.remove(&task.segment_number);
            if self.quota_in_progress {
                continue;
            }
            if !matches!(
                self.sink.as_ref().map(|s| s.state()),
                Some(SinkState::Open)
            ) {
                continue;
            }

            let prior = self.buffered.get(task.segment_number).cloned();

            let Some(sink) = self.sink.as_mut() else {
                continue;
            };
            let removed = sink.remove(task.span.start, task.span.end).await;
            let appended = match removed {
                Ok(()) => sink.append(task.bytes.clone(), task.span).await,
                Err(e) => Err(e),
            };

            match appended {
                Ok(()) => {
                    self.buffered.insert(BufferedSegmentInfo {
                        number: task.segment_number,
                        start: task.span.start,
                        end: task.span.end,
                        representation: task.representation.id,
                        bitrate: task.representation.bitrate,
                        byte_size: task.bytes.len(),
                    });
                    debug!(kind = %self.kind, number = task.segment_number, "segment replaced");
                }
                Err(error) => {
                    // Restore the prior record; the next sync reconciles
                    // whatever the sink actually still holds.
                    warn!(kind = %self.kind, number = task.segment_number, error = %error, "replacement failed");
                    if let Some(prior) = prior {
                        self.buffered.insert(prior);
                    }
                }
            }
            self.sync_buffered_segments();
            self.publish_buffer_level(playhead);
        }
        Ok(())
    }

    /// Reconcile the buffered-segment map with the sink's reported ranges
    /// (§ buffered-segments sync).
    pub fn sync_buffered_segments(&mut self) {
        let ranges = self.buffered_ranges();
        self.buffered.sync(&ranges);
    }

    /// Quota-exceeded recovery (§ quota recovery). Bounded and idempotent.
    async fn handle_quota_exceeded(&mut self, now: Instant, playhead: f64) -> PipelineResult<()> {
        if self.quota_in_progress {
            return Ok(());
        }
        self.quota_in_progress = true;

        if let Some(sink) = self.sink.as_mut() {
            let _ = sink.abort().await;
        }

        let level = self.buffer_level(playhead);
        let base = self.critical_level.unwrap_or(level);
        let critical = (base * self.opts.quota_correction_factor).max(10.0);
        self.critical_level = Some(critical);
        self.buffering_target = critical;
        debug!(kind = %self.kind, level, critical, "quota exceeded, shrinking buffer target");
        self.events
            .publish(PipelineEvent::BufferTargetChanged { new_target: critical });

        self.cancel_all_downloads();
        self.append_queue.clear();
        self.replacement_queue.clear();
        self.replacing.clear();

        let keep_start = (playhead - self.opts.buffer_behind.min(2.0)).max(0.0);
        let keep_end = playhead + critical;
        if let Some(sink) = self.sink.as_mut() {
            let buffered_end = sink.buffered().end().unwrap_or(keep_end);
            if keep_start > 0.0 {
                let _ = sink.remove(0.0, keep_start).await;
            }
            if buffered_end > keep_end {
                let _ = sink.remove(keep_end, buffered_end).await;
            }
        }
        self.buffered.retain_window(keep_start, keep_end);
        self.sync_buffered_segments();

        // Resume pointers at the new buffer end, or at the playhead when
        // nothing useful remains.
        let probe = self
            .buffered_ranges()
            .span_at(playhead)
            .map(|s| s.end)
            .unwrap_or(playhead);
        let next = self.current.as_ref().and_then(|rep| {
            rep.index
                .at(probe)
                .or_else(|| rep.index.iter().find(|r| r.start >= probe))
                .map(|r| r.number)
        });
        self.next_to_download = next;
        self.next_to_append = next;

        self.quota_quiesce_until = Some(now + Self::QUOTA_QUIESCE);
        self.quota_in_progress = false;
        Ok(())
    }

    /// Background prune: keep at most `buffer_behind` seconds behind the
    /// playhead (§ pruning).
    pub async fn prune(&mut self, playhead: f64) -> PipelineResult<()> {
        let cutoff = playhead - self.opts.buffer_behind;
        let Some(first_start) = self.buffered_ranges().spans().first().map(|s| s.start) else {
            return Ok(());
        };
        if playhead - first_start <= self.opts.buffer_behind {
            return Ok(());
        }
        if let Some(sink) = self.sink.as_mut() {
            if sink.state() == SinkState::Open {
                let _ = sink.remove(0.0, cutoff).await;
            }
        }
        self.sync_buffered_segments();
        Ok(())
    }

    /// External seek (§ seek handling): abort, cancel, reset the append
    /// queue, prune to the new keep window and recompute pointers.
    pub async fn on_seek(&mut self, target: f64) -> PipelineResult<()> {
        if let Some(sink) = self.sink.as_mut() {
            if sink.state() == SinkState::Open {
                let _ = sink.abort().await;
            }
        }
        self.cancel_all_downloads();
        self.append_queue.clear();
        self.replacement_queue.clear();
        self.replacing.clear();

        let keep_start = (target - self.opts.buffer_behind).max(0.0);
        let keep_end = target + self.buffering_target;
        if let Some(sink) = self.sink.as_mut() {
            let buffered_end = sink.buffered().end().unwrap_or(0.0);
            if keep_start > 0.0 {
                let _ = sink.remove(0.0, keep_start).await;
            }
            if buffered_end > keep_end {
                let _ = sink.remove(keep_end, buffered_end).await;
            }
        }
        self.buffered.retain_window(keep_start, keep_end);
        self.sync_buffered_segments();

        let next = self.current.as_ref().and_then(|rep| {
            rep.index
                .at(target)
                .or_else(|| rep.index.iter().find(|r| r.start >= target))
                .map(|r| r.number)
        });
        self.next_to_download = next;
        self.next_to_append = next;
        debug!(kind = %self.kind, target, next_segment = ?next, "seek handled");
        Ok(())
    }

    fn publish_buffer_level(&self, playhead: f64) {
        if self.kind == TrackKind::Video {
            self.events.publish(PipelineEvent::BufferLevelUpdated {
                level: self.buffer_level(playhead),
            });
        }
    }

    fn cancel_all_downloads(&mut self) {
        for task in self.active.values() {
            task.cancel.cancel();
        }
        // Futures resolve to Cancelled and are dropped on their completion.
    }

    pub async fn shutdown(&mut self) {
        self.streaming_active = false;
        self.cancel_all_downloads();
        self.append_queue.clear();
        self.replacement_queue.clear();
        self.replacing.clear();
        if let Some(mut sink) = self.sink.take() {
            let _ = sink.close().await;
        }
    }

    // Test-facing introspection.

    pub fn next_segment_to_download(&self) -> Option<u64> {
        self.next_to_download
    }

    pub fn next_segment_to_append(&self) -> Option<u64> {
        self.next_to_append
    }

    pub fn append_queue_len(&self) -> usize {
        self.append_queue.len()
    }

    pub fn active_download_count(&self) -> usize {
        self.active.len()
    }

    pub fn buffered_segment_count(&self) -> usize {
        self.buffered.len()
    }

    pub fn buffered_segment(&self, number: u64) -> Option<&BufferedSegmentInfo> {
        self.buffered.get(number)
    }

    /// Test seam: place a segment record directly into the buffered map.
    pub fn inject_buffered_segment(&mut self, info: BufferedSegmentInfo) {
        self.buffered.insert(info);
    }
}
