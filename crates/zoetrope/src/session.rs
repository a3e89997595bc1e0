use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::{
    sync::mpsc,
    time::{Instant as TokioInstant, sleep_until},
};
use tracing::{debug, warn};
use zoetrope_abr::{
    BandwidthEstimator, FilterInputs, QualityCheckInputs, QualitySelector, SwitchReason,
    SwitchRequest, ThroughputStrategy,
};
use zoetrope_core::{NetworkHint, PlayerOptions, Representation, RepresentationId, TrackKind};
use zoetrope_events::{AbrEvent, Event, EventBus, PlaybackEvent};
use zoetrope_net::Fetcher;
use zoetrope_pipeline::{
    DownloadOutcome, GapCheck, GapHandler, PipelineError, PipelineResult, PlaybackHandle,
    PlayerContext, Scheduler, SegmentPipeline, StallDetector, StallSample,
};
use zoetrope_sink::SinkFactory;

/// Commands consumed by the core from the outside world.
#[derive(Debug)]
pub enum PlayerCommand {
    /// Manifest parsed; install the selectable representations.
    RepresentationsChanged {
        video: Vec<Arc<Representation>>,
        audio: Vec<Arc<Representation>>,
    },
    /// External seek request.
    Seek { to: f64 },
    /// Force a specific video representation (disables ABR).
    ForceRepresentation { id: RepresentationId },
    /// Re-enable or disable automatic adaptation.
    SetAbrEnabled(bool),
    PlaybackStarted,
    PlaybackPaused,
    PlaybackEnded,
    /// The engine finished an in-progress seek.
    Seeked,
    DimensionsChanged(FilterInputs),
    NetworkHint(NetworkHint),
    Shutdown,
}

/// Cloneable handle for feeding commands into a running [`CoreSession`] and
/// subscribing to its events.
#[derive(Clone)]
pub struct CoreHandle {
    tx: mpsc::Sender<PlayerCommand>,
    events: EventBus,
}

impl CoreHandle {
    pub async fn send(
        &self,
        command: PlayerCommand,
    ) -> Result<(), mpsc::error::SendError<PlayerCommand>> {
        self.tx.send(command).await
    }

    pub fn try_send(
        &self,
        command: PlayerCommand,
    ) -> Result<(), mpsc::error::TrySendError<PlayerCommand>> {
        self.tx.try_send(command)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }
}

/// The streaming core: owns every component and drives them from a single
/// task.
///
/// All state mutation happens inside [`Self::run`]'s loop; the in-flight
/// fetch set is polled from the same loop, so component invariants hold
/// between suspension points without locking.
pub struct CoreSession {
    opts: PlayerOptions,
    events: EventBus,
    commands: mpsc::Receiver<PlayerCommand>,
    playback: Arc<dyn PlaybackHandle>,
    estimator: Arc<Mutex<BandwidthEstimator>>,
    selector: QualitySelector,
    scheduler: Scheduler,
    stall: StallDetector,
    gap: GapHandler,
    video: SegmentPipeline,
    audio: Option<SegmentPipeline>,

    playback_started: bool,
    ended: bool,
    prev_level: f64,
    known_buffer_target: f64,
    /// Quality-switch grace window; reverts the stall context afterwards.
    switching_until: Option<Instant>,
    tick_asap: bool,
}

impl CoreSession {
    /// Stall sampling and gap checking cadence (10 Hz).
    const PROBE_INTERVAL: Duration = Duration::from_millis(100);
    const QUALITY_SWITCH_GRACE: Duration = Duration::from_millis(1500);

    pub fn new(
        opts: PlayerOptions,
        playback: Arc<dyn PlaybackHandle>,
        fetcher: Arc<dyn Fetcher>,
        video_sinks: Box<dyn SinkFactory>,
        audio_sinks: Option<Box<dyn SinkFactory>>,
    ) -> (Self, CoreHandle) {
        let events = EventBus::new(opts.event_capacity);
        let (tx, rx) = mpsc::channel(opts.command_capacity.max(1));
        let estimator = Arc::new(Mutex::new(BandwidthEstimator::new(
            opts.abr.default_bandwidth_bps,
        )));

        let video = SegmentPipeline::new(
            TrackKind::Video,
            opts.buffer.clone(),
            Arc::clone(&fetcher),
            video_sinks,
            Arc::clone(&estimator),
            events.clone(),
        );
        let audio = audio_sinks.map(|factory| {
            SegmentPipeline::new(
                TrackKind::Audio,
                opts.buffer.clone(),
                Arc::clone(&fetcher),
                factory,
                Arc::clone(&estimator),
                events.clone(),
            )
        });

        let selector = QualitySelector::new(opts.abr.clone(), opts.buffer.buffering_target);
        let scheduler = Scheduler::new(opts.scheduler.clone());
        let stall = StallDetector::new(opts.stall.clone());
        let gap = GapHandler::new(opts.stall.gap_jump_tolerance);
        let known_buffer_target = opts.buffer.buffering_target;

        let session = Self {
            opts,
            events: events.clone(),
            commands: rx,
            playback,
            estimator,
            selector,
            scheduler,
            stall,
            gap,
            video,
            audio,
            playback_started: false,
            ended: false,
            prev_level: 0.0,
            known_buffer_target,
            switching_until: None,
            tick_asap: false,
        };
        (session, CoreHandle { tx, events })
    }

    /// Drive the core until shutdown. Single task; timers, commands and
    /// download completions are multiplexed here.
    pub async fn run(mut self) {
        let mut next_tick = TokioInstant::now() + self.scheduler.initial_delay();
        let mut next_probe = TokioInstant::now() + Self::PROBE_INTERVAL;
        let mut next_prune = TokioInstant::now() + self.opts.buffer.pruning_interval;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else { break };
                    if matches!(command, PlayerCommand::Shutdown) {
                        self.shutdown().await;
                        break;
                    }
                    if let Err(error) = self.handle_command(command).await {
                        self.fail(&error);
                        break;
                    }
                    if self.tick_asap {
                        self.tick_asap = false;
                        next_tick = TokioInstant::now();
                    }
                }

                () = sleep_until(next_tick), if !self.scheduler.is_stopped() => {
                    match self.tick().await {
                        Ok(interval) => next_tick = TokioInstant::now() + interval,
                        Err(error) => {
                            self.fail(&error);
                            break;
                        }
                    }
                }

                () = sleep_until(next_probe) => {
                    self.probe();
                    next_probe = TokioInstant::now() + Self::PROBE_INTERVAL;
                }

                () = sleep_until(next_prune) => {
                    let playhead = self.playback.position();
                    let _ = self.video.prune(playhead).await;
                    if let Some(audio) = self.audio.as_mut() {
                        let _ = audio.prune(playhead).await;
                    }
                    next_prune = TokioInstant::now() + self.opts.buffer.pruning_interval;
                }

                Some(outcome) = self.video.next_completion() => {
                    if let Err(error) = self.on_video_completion(outcome).await {
                        self.fail(&error);
                        break;
                    }
                }

                Some(outcome) = async {
                    match self.audio.as_mut() {
                        Some(audio) => audio.next_completion().await,
                        None => std::future::pending().await,
                    }
                } => {
                    if let Err(error) = self.on_audio_completion(outcome).await {
                        self.fail(&error);
                        break;
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, command: PlayerCommand) -> PipelineResult<()> {
        let now = Instant::now();
        match command {
            PlayerCommand::RepresentationsChanged { video, audio } => {
                self.install_representations(video, audio, now).await?;
            }
            PlayerCommand::Seek { to } => {
                debug!(to, "seek requested");
                self.stall.set_context(PlayerContext::Seeking, now);
                self.gap.note_seek(now);
                self.selector.on_seek(now);
                self.scheduler.on_seek();
                self.video.on_seek(to).await?;
                if let Some(audio) = self.audio.as_mut() {
                    audio.on_seek(to).await?;
                }
                self.playback.seek_to(to);
                self.tick_asap = true;
            }
            PlayerCommand::Seeked => {
                self.stall.set_context(PlayerContext::Normal, now);
            }
            PlayerCommand::ForceRepresentation { id } => {
                self.selector.set_abr_enabled(false);
                if let Some(request) = self.selector.force_representation(id, now) {
                    let playhead = self.playback.position();
                    self.apply_video_switch(request, playhead).await?;
                }
            }
            PlayerCommand::SetAbrEnabled(enabled) => {
                self.selector.set_abr_enabled(enabled);
            }
            PlayerCommand::PlaybackStarted => {
                self.playback_started = true;
                self.scheduler.on_playback_started();
                self.selector.on_playback_start(now);
                self.stall.set_context(PlayerContext::Normal, now);
            }
            PlayerCommand::PlaybackPaused => {
                let level = self.video.buffer_level(self.playback.position());
                self.scheduler.on_pause(level >= self.opts.abr.min_buffer_level);
            }
            PlayerCommand::PlaybackEnded => {
                self.ended = true;
                self.scheduler.on_end();
                self.events.publish(PlaybackEvent::EndOfStream);
            }
            PlayerCommand::DimensionsChanged(inputs) => {
                self.selector.update_filter(inputs);
            }
            PlayerCommand::NetworkHint(hint) => {
                self.estimator.lock().update_hint(hint);
            }
            PlayerCommand::Shutdown => unreachable!("handled by the run loop"),
        }
        Ok(())
    }

    async fn install_representations(
        &mut self,
        video: Vec<Arc<Representation>>,
        audio: Vec<Arc<Representation>>,
        now: Instant,
    ) -> PipelineResult<()> {
        let playhead = self.playback.position();

        if !video.is_empty() {
            self.selector.set_representations(video.clone());
            self.events.publish(AbrEvent::RepresentationsChanged {
                kind: TrackKind::Video,
                count: self.selector.representations().len(),
            });

            // First decision for the track; the selector may say "no change"
            // when the startup pick is its default anchor.
            let inputs = self.quality_inputs(playhead);
            let request = self.selector.check_playback_quality(now, inputs);
            let rep = match request {
                Some(ref request) => self
                    .selector
                    .representations()
                    .get(request.index)
                    .cloned(),
                None => self.selector.current_representation().cloned(),
            };
            if let Some(rep) = rep {
                self.video.set_streaming_active(true);
                let reason = request.map_or(SwitchReason::Start, |r| r.reason);
                self.video.apply_representation(rep, reason, playhead).await?;
                self.selector.note_initial_selection(now);
            }
        }

        if !audio.is_empty() && self.audio.is_some() {
            let mut sorted = audio;
            sorted.sort_by_key(|r| r.bitrate);
            self.events.publish(AbrEvent::RepresentationsChanged {
                kind: TrackKind::Audio,
                count: sorted.len(),
            });
            let bandwidth = self.estimator.lock().estimate_bps();
            let index = ThroughputStrategy.choose(&sorted, bandwidth);
            if let (Some(audio_pipeline), Some(rep)) =
                (self.audio.as_mut(), sorted.get(index).cloned())
            {
                audio_pipeline.set_streaming_active(true);
                audio_pipeline
                    .apply_representation(rep, SwitchReason::Start, playhead)
                    .await?;
            }
        }

        self.scheduler.on_source_change();
        self.tick_asap = true;
        Ok(())
    }

    /// One scheduler tick: quality check, then drive both pipelines.
    async fn tick(&mut self) -> PipelineResult<Duration> {
        let now = Instant::now();
        let playhead = self.playback.position();
        let level = self.video.buffer_level(playhead);

        // Buffer ran empty during playback: BOLA restarts, context goes to
        // buffering.
        if self.playback_started && level <= f64::EPSILON && self.prev_level > f64::EPSILON {
            debug!("buffer empty, restarting BOLA startup phase");
            self.selector.on_buffer_empty();
            self.stall.set_context(PlayerContext::Buffering, now);
        } else if self.stall.context() == PlayerContext::Buffering && level > 1.0 {
            self.stall.set_context(PlayerContext::Normal, now);
        }
        self.prev_level = level;
        self.sync_buffer_target();

        if self.scheduler.should_check_quality(now) {
            let inputs = self.quality_inputs(playhead);
            if let Some(request) = self.selector.check_playback_quality(now, inputs) {
                self.apply_video_switch(request, playhead).await?;
                // The switch path reschedules through its own pipeline work;
                // keep the current cadence for the next tick.
                return Ok(self.scheduler.current_interval());
            }
        }

        let cap = self
            .scheduler
            .is_preloading()
            .then(|| self.scheduler.preload_target());
        let started = self.video.load_next(now, playhead, cap).await?;
        for start in &started {
            self.selector
                .on_segment_download_begin(now, start.segment_start);
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.load_next(now, playhead, cap).await?;
        }

        let interval = self.scheduler.next_interval(
            level,
            self.video.buffering_target(),
            self.video.average_segment_duration(),
        );
        Ok(interval)
    }

    fn quality_inputs(&self, playhead: f64) -> QualityCheckInputs {
        QualityCheckInputs {
            buffer_level: self.video.buffer_level(playhead),
            bandwidth_bps: self.estimator.lock().estimate_bps(),
            quality: self.playback.video_quality(),
        }
    }

    async fn apply_video_switch(
        &mut self,
        request: SwitchRequest,
        playhead: f64,
    ) -> PipelineResult<()> {
        let Some(rep) = self.selector.representations().get(request.index).cloned() else {
            return Ok(());
        };
        let now = Instant::now();
        self.stall.set_context(PlayerContext::QualitySwitching, now);
        self.switching_until = Some(now + Self::QUALITY_SWITCH_GRACE);
        self.video.set_streaming_active(true);
        self.video
            .apply_representation(rep, request.reason, playhead)
            .await
    }

    async fn on_video_completion(&mut self, outcome: DownloadOutcome) -> PipelineResult<()> {
        let now = Instant::now();
        let playhead = self.playback.position();
        if let Some(done) = self.video.on_download_complete(outcome, now, playhead) {
            self.selector
                .on_segment_download_end(now, done.duration_secs, done.is_replacement);
        }
        self.video.process_append_queue(playhead).await?;
        self.video.process_replacements(playhead).await?;
        self.sync_buffer_target();
        Ok(())
    }

    async fn on_audio_completion(&mut self, outcome: DownloadOutcome) -> PipelineResult<()> {
        let now = Instant::now();
        let playhead = self.playback.position();
        if let Some(audio) = self.audio.as_mut() {
            audio.on_download_complete(outcome, now, playhead);
            audio.process_append_queue(playhead).await?;
        }
        Ok(())
    }

    /// Quota recovery shrinks the pipeline's target; mirror it into the
    /// selector so BOLA's placeholder cap follows.
    fn sync_buffer_target(&mut self) {
        let target = self.video.buffering_target();
        if (target - self.known_buffer_target).abs() > f64::EPSILON {
            self.known_buffer_target = target;
            self.selector.set_buffer_target(target);
        }
    }

    /// 10 Hz probe: stall detection, context maintenance and gap jumping.
    fn probe(&mut self) {
        let now = Instant::now();
        if let Some(until) = self.switching_until {
            if now >= until {
                self.stall.set_context(PlayerContext::Normal, now);
                self.switching_until = None;
            }
        }

        let playhead = self.playback.position();
        let ranges = self.video.buffered_ranges();
        let paused = self.playback.is_paused();
        let seeking = self.playback.is_seeking();

        let sample = StallSample {
            position: playhead,
            paused,
            seeking,
            ended: self.ended,
            playhead_buffered: ranges.contains(playhead),
            download_covers_playhead: self.video.download_covers(playhead),
        };
        if self.stall.sample(now, sample) {
            warn!(position = playhead, "stall confirmed");
            self.events
                .publish(PlaybackEvent::StallConfirmed { position: playhead });
        }

        let check = GapCheck {
            position: playhead,
            paused,
            seeking,
            quality_switching: self.stall.context() == PlayerContext::QualitySwitching,
            stall_confirmed: self.stall.is_confirmed(),
            duration: self.playback.duration(),
            buffered: &ranges,
        };
        if let Some(target) = self.gap.check(now, &check) {
            self.playback.seek_to(target);
            self.events.publish(PlaybackEvent::GapJumped {
                from: playhead,
                to: target,
            });
            self.stall.reset(now);
        }
    }

    fn fail(&mut self, error: &PipelineError) {
        warn!(%error, "fatal pipeline error, stopping session");
        self.scheduler.on_end();
        self.events.publish(PlaybackEvent::PlaybackError {
            error: error.to_string(),
            fatal: true,
        });
    }

    async fn shutdown(&mut self) {
        self.video.shutdown().await;
        if let Some(audio) = self.audio.as_mut() {
            audio.shutdown().await;
        }
    }
}
