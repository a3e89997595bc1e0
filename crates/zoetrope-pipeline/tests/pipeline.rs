//! Pipeline integration tests: dispatch, ordered appends, blacklisting,
//! fast-switch replacement, quota recovery and seek handling against the
//! in-memory sink and a scripted fetcher.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use url::Url;
use zoetrope_abr::{BandwidthEstimator, SwitchReason};
use zoetrope_core::{
    BufferOptions, BufferedSegmentInfo, Representation, RepresentationId, SegmentIndex,
    SegmentReference, TrackKind, UrlTemplate,
};
use zoetrope_events::{Event, EventBus, PipelineEvent};
use zoetrope_pipeline::{
    SegmentPipeline,
    mock::{ScriptedFetcher, ScriptedResponse},
};
use zoetrope_sink::{MediaSink, MemorySinkFactory, SharedMemorySink, TimeSpan};

const SEG_DURATION: f64 = 4.0;

fn rep(id: u32, bitrate_kbps: u64, segments: u64) -> Arc<Representation> {
    let base = Url::parse(&format!("https://cdn.example/rep{id}/")).unwrap();
    let refs = (0..segments)
        .map(|n| SegmentReference {
            number: n,
            start: n as f64 * SEG_DURATION,
            end: (n + 1) as f64 * SEG_DURATION,
            template: UrlTemplate::new(base.clone(), "seg-$Number$.m4s"),
        })
        .collect();
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
        index: SegmentIndex::new(refs),
    })
}

fn segment_url(rep_id: u32, number: u64) -> Url {
    Url::parse(&format!("https://cdn.example/rep{rep_id}/seg-{number}.m4s")).unwrap()
}

struct Harness {
    pipeline: SegmentPipeline,
    fetcher: ScriptedFetcher,
    factory: MemorySinkFactory,
    estimator: Arc<Mutex<BandwidthEstimator>>,
    events: EventBus,
}

fn harness_with(opts: BufferOptions) -> Harness {
    let fetcher = ScriptedFetcher::fast();
    let factory = MemorySinkFactory::new();
    let estimator = Arc::new(Mutex::new(BandwidthEstimator::new(3_000_000)));
    let events = EventBus::new(256);
    let mut pipeline = SegmentPipeline::new(
        TrackKind::Video,
        opts,
        Arc::new(fetcher.clone()),
        Box::new(factory.clone()),
        Arc::clone(&estimator),
        events.clone(),
    );
    pipeline.set_streaming_active(true);
    Harness {
        pipeline,
        fetcher,
        factory,
        estimator,
        events,
    }
}

fn harness() -> Harness {
    harness_with(BufferOptions::default())
}

impl Harness {
    fn sink(&self) -> SharedMemorySink {
        self.factory.last_sink().expect("sink opened")
    }

    /// Drive dispatch + completion + append until idle or `rounds` runs out.
    async fn settle(&mut self, now: Instant, playhead: f64, rounds: usize) {
        for _ in 0..rounds {
            self.pipeline.load_next(now, playhead, None).await.unwrap();
            if !self.pipeline.has_active_downloads() {
                break;
            }
            while let Some(outcome) = self.pipeline.next_completion().await {
                self.pipeline.on_download_complete(outcome, now, playhead);
                if !self.pipeline.has_active_downloads() {
                    break;
                }
            }
            self.pipeline.process_append_queue(playhead).await.unwrap();
        }
    }

    /// Pre-buffer `spans` directly through the sink, bypassing downloads.
    async fn prefill(&mut self, spans: &[(f64, f64)], bytes_per_span: usize) {
        let mut sink = self.sink();
        for &(start, end) in spans {
            sink.append(
                bytes::Bytes::from(vec![0u8; bytes_per_span]),
                TimeSpan::new(start, end),
            )
            .await
            .unwrap();
        }
    }
}

#[tokio::test(start_paused = true)]
async fn downloads_respect_concurrency_limit() {
    let mut h = harness();
    let now = Instant::now();
    h.pipeline
        .apply_representation(rep(0, 1000, 100), SwitchReason::Start, 0.0)
        .await
        .unwrap();
    h.pipeline.load_next(now, 0.0, None).await.unwrap();
    assert_eq!(h.pipeline.active_download_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn managed_sink_allows_one_download_at_a_time() {
    let fetcher = ScriptedFetcher::fast();
    let mut factory = MemorySinkFactory::new();
    factory.managed = true;
    let estimator = Arc::new(Mutex::new(BandwidthEstimator::new(3_000_000)));
    let mut pipeline = SegmentPipeline::new(
        TrackKind::Video,
        BufferOptions::default(),
        Arc::new(fetcher),
        Box::new(factory),
        estimator,
        EventBus::new(16),
    );
    pipeline.set_streaming_active(true);
    pipeline
        .apply_representation(rep(0, 1000, 100), SwitchReason::Start, 0.0)
        .await
        .unwrap();

    pipeline.load_next(Instant::now(), 0.0, None).await.unwrap();
    assert_eq!(pipeline.active_download_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn segments_append_in_order_despite_out_of_order_completion() {
    let mut h = harness();
    let now = Instant::now();
    let r = rep(0, 1000, 10);
    // Segment 0 is slow, segment 1 fast: completion order is 1, 0.
    h.fetcher.script(
        segment_url(0, 0),
        ScriptedResponse::Ok {
            bytes: 400_000,
            elapsed: Duration::from_millis(800),
        },
    );
    h.fetcher.script(
        segment_url(0, 1),
        ScriptedResponse::Ok {
            bytes: 400_000,
            elapsed: Duration::from_millis(100),
        },
    );

    h.pipeline
        .apply_representation(r, SwitchReason::Start, 0.0)
        .await
        .unwrap();
    h.pipeline.load_next(now, 0.0, None).await.unwrap();

    // First completion is segment 1; it must wait for segment 0.
    let outcome = h.pipeline.next_completion().await.unwrap();
    let done = h
        .pipeline
        .on_download_complete(outcome, now, 0.0)
        .expect("completed");
    assert_eq!(done.segment_number, 1);
    h.pipeline.process_append_queue(0.0).await.unwrap();
    assert_eq!(h.pipeline.buffered_segment_count(), 0);
    assert_eq!(h.pipeline.next_segment_to_append(), Some(0));

    // Segment 0 lands, both append in order.
    let outcome = h.pipeline.next_completion().await.unwrap();
    let done = h
        .pipeline
        .on_download_complete(outcome, now, 0.0)
        .expect("completed");
    assert_eq!(done.segment_number, 0);
    h.pipeline.process_append_queue(0.0).await.unwrap();

    assert_eq!(h.pipeline.buffered_segment_count(), 2);
    assert_eq!(h.pipeline.next_segment_to_append(), Some(2));
    let buffered = h.sink().buffered();
    assert_eq!(buffered.spans().len(), 1);
    assert_eq!(buffered.end(), Some(8.0));
}

#[tokio::test(start_paused = true)]
async fn admission_stops_at_buffering_target() {
    let mut h = harness();
    let now = Instant::now();
    h.pipeline
        .apply_representation(rep(0, 1000, 100), SwitchReason::Start, 0.0)
        .await
        .unwrap();

    // 16 settle rounds at 8 s per round would be 128 s of media, well past
    // the 60 s target: admission must stop around the target.
    h.settle(now, 0.0, 16).await;
    let level = h.pipeline.buffer_level(0.0);
    assert!(level >= 50.0, "level {level} too low");
    assert!(level <= 66.0, "level {level} overshoots the target");
}

#[tokio::test(start_paused = true)]
async fn not_found_blacklists_url_and_skips_segment() {
    let mut h = harness();
    let now = Instant::now();
    h.fetcher
        .script(segment_url(0, 0), ScriptedResponse::Status(404));

    h.pipeline
        .apply_representation(rep(0, 1000, 10), SwitchReason::Start, 0.0)
        .await
        .unwrap();
    h.settle(now, 0.0, 4).await;

    // Segment 0 was skipped, later segments appended, and the 404 URL was
    // fetched exactly once.
    assert!(h.pipeline.buffered_segment(0).is_none());
    assert!(h.pipeline.buffered_segment(1).is_some());
    let fetches_of_0 = h
        .fetcher
        .requests()
        .iter()
        .filter(|u| **u == segment_url(0, 0))
        .count();
    assert_eq!(fetches_of_0, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_next_tick() {
    let mut h = harness();
    let now = Instant::now();
    h.fetcher
        .script(segment_url(0, 0), ScriptedResponse::Status(503));

    h.pipeline
        .apply_representation(rep(0, 1000, 10), SwitchReason::Start, 0.0)
        .await
        .unwrap();
    h.settle(now, 0.0, 4).await;

    // The 503 was retried on a later tick and the segment made it in.
    assert!(h.pipeline.buffered_segment(0).is_some());
    let fetches_of_0 = h
        .fetcher
        .requests()
        .iter()
        .filter(|u| **u == segment_url(0, 0))
        .count();
    assert_eq!(fetches_of_0, 2);
}

#[tokio::test(start_paused = true)]
async fn failure_near_timeout_blacklists_the_number() {
    let mut h = harness();
    let t0 = Instant::now();
    h.fetcher.script(
        segment_url(0, 0),
        ScriptedResponse::Timeout(Duration::from_secs(9)),
    );

    h.pipeline
        .apply_representation(rep(0, 1000, 10), SwitchReason::Start, 0.0)
        .await
        .unwrap();
    h.pipeline.load_next(t0, 0.0, None).await.unwrap();

    // 9 s elapsed is past 80 % of the 10 s segment timeout.
    while h.pipeline.has_active_downloads() {
        let outcome = h.pipeline.next_completion().await.unwrap();
        h.pipeline
            .on_download_complete(outcome, t0 + Duration::from_secs(9), 0.0);
    }
    h.pipeline.process_append_queue(0.0).await.unwrap();

    // Skip marker advanced the append pointer past the dead segment.
    assert!(h.pipeline.next_segment_to_append().unwrap() >= 1);
    assert!(h.pipeline.buffered_segment(0).is_none());
}

#[tokio::test(start_paused = true)]
async fn cache_hits_do_not_feed_the_estimator() {
    let mut h = harness();
    let now = Instant::now();
    h.fetcher
        .script(segment_url(0, 0), ScriptedResponse::CacheHit { bytes: 400_000 });

    h.pipeline
        .apply_representation(rep(0, 1000, 10), SwitchReason::Start, 0.0)
        .await
        .unwrap();
    h.pipeline.load_next(now, 0.0, None).await.unwrap();
    let outcome = h.pipeline.next_completion().await.unwrap();
    let first = h.pipeline.on_download_complete(outcome, now, 0.0);

    // One of the two in-flight segments was the cache hit; completions may
    // arrive in either order, so drain the other too.
    let outcome = h.pipeline.next_completion().await.unwrap();
    h.pipeline.on_download_complete(outcome, now, 0.0);
    assert!(first.is_some());

    // Only the network transfer sampled.
    assert_eq!(h.estimator.lock().sample_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn fast_switch_dispatches_earliest_deadline_replacement() {
    let mut h = harness();
    let now = Instant::now();
    let low = rep(1, 1000, 60);
    let high = rep(6, 6000, 60);

    // Playhead at segment 40's start; segments 40..=50 buffered at the low
    // bitrate.
    let playhead = 40.0 * SEG_DURATION;
    h.pipeline
        .apply_representation(Arc::clone(&high), SwitchReason::Buffer, playhead)
        .await
        .unwrap();
    h.prefill(&[(playhead, 51.0 * SEG_DURATION)], 500_000).await;
    for n in 40..=50u64 {
        h.pipeline.inject_buffered_segment(BufferedSegmentInfo {
            number: n,
            start: n as f64 * SEG_DURATION,
            end: (n + 1) as f64 * SEG_DURATION,
            representation: low.id,
            bitrate: low.bitrate,
            byte_size: 500_000,
        });
    }

    let started = h.pipeline.load_next(now, playhead, None).await.unwrap();

    // Threshold = playhead + 4 s * 1.5 = playhead + 6 s: segment 41 (starts
    // at +4 s) does not qualify, 42 is the earliest deadline.
    let replacements: Vec<_> = started.iter().filter(|s| s.is_replacement).collect();
    assert!(!replacements.is_empty());
    assert_eq!(replacements[0].segment_number, 42);
    assert!(started.iter().all(|s| s.segment_number != 41 || !s.is_replacement));
    assert!(h.pipeline.active_download_count() <= 2);

    // Completing the replacement swaps the buffered record to the high
    // bitrate.
    while h.pipeline.has_active_downloads() {
        let outcome = h.pipeline.next_completion().await.unwrap();
        h.pipeline.on_download_complete(outcome, now, playhead);
    }
    h.pipeline.process_replacements(playhead).await.unwrap();
    let info = h.pipeline.buffered_segment(42).expect("still buffered");
    assert_eq!(info.bitrate, high.bitrate);
    assert_eq!(info.representation, high.id);
}

#[tokio::test(start_paused = true)]
async fn quota_recovery_shrinks_target_and_prunes() {
    let mut h = harness();
    let now = Instant::now();
    let mut events = h.events.subscribe();

    h.pipeline
        .apply_representation(rep(0, 1000, 100), SwitchReason::Start, 0.0)
        .await
        .unwrap();

    // Dispatch segment 0, then fill the sink to a 70 s level and force the
    // append to hit the quota.
    h.pipeline.load_next(now, 0.0, None).await.unwrap();
    h.prefill(&[(0.0, 70.0)], 1_000_000).await;
    h.sink().script_failure(zoetrope_sink::SinkError::QuotaExceeded);

    while h.pipeline.has_active_downloads() {
        let outcome = h.pipeline.next_completion().await.unwrap();
        h.pipeline.on_download_complete(outcome, now, 0.0);
    }
    h.pipeline.process_append_queue(0.0).await.unwrap();

    // New target = max(10, 70 * 0.8) = 56.
    assert!((h.pipeline.buffering_target() - 56.0).abs() < 1e-9);
    let mut saw_target_change = false;
    while let Ok(event) = events.try_recv() {
        if let Event::Pipeline(PipelineEvent::BufferTargetChanged { new_target }) = event {
            assert!((new_target - 56.0).abs() < 1e-9);
            saw_target_change = true;
        }
    }
    assert!(saw_target_change, "BufferTargetChanged not published");

    // Buffer kept inside [playhead - 2, playhead + 56].
    let buffered = h.sink().buffered();
    assert!(buffered.end().unwrap() <= 56.0 + 1e-9);

    // Queues drained, downloads cancelled.
    assert_eq!(h.pipeline.append_queue_len(), 0);
    assert_eq!(h.pipeline.active_download_count(), 0);

    // Quiescence: no new downloads inside the 2 s window, even with room
    // in the shrunken buffer (playhead advanced toward its end).
    let started = h.pipeline.load_next(now, 50.0, None).await.unwrap();
    assert!(started.is_empty());
    let later = now + Duration::from_secs(3);
    let started = h.pipeline.load_next(later, 50.0, None).await.unwrap();
    assert!(!started.is_empty(), "downloads resume after quiescence");
}

#[tokio::test(start_paused = true)]
async fn seek_resets_queues_and_recomputes_pointers() {
    let mut h = harness();
    let now = Instant::now();

    h.pipeline
        .apply_representation(rep(0, 1000, 100), SwitchReason::Start, 30.0)
        .await
        .unwrap();
    // Buffered [28, 70], playhead 30, downloads in flight.
    h.prefill(&[(28.0, 70.0)], 2_000_000).await;
    h.pipeline.load_next(now, 30.0, None).await.unwrap();
    let aborts_before = h.sink().abort_count();

    h.pipeline.on_seek(10.0).await.unwrap();

    assert!(h.sink().abort_count() > aborts_before);
    assert_eq!(h.pipeline.append_queue_len(), 0);
    // Keep window [5, 70]: the buffered tail survives intact.
    let buffered = h.sink().buffered();
    assert_eq!(buffered.spans().first().map(|s| s.start), Some(28.0));
    assert_eq!(buffered.end(), Some(70.0));
    // Pointers recomputed at the seek target: 10 s / 4 s = segment 2.
    assert_eq!(h.pipeline.next_segment_to_download(), Some(2));
    assert_eq!(h.pipeline.next_segment_to_append(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn seek_prunes_outside_the_keep_window() {
    let mut h = harness();
    h.pipeline
        .apply_representation(rep(0, 1000, 200), SwitchReason::Start, 300.0)
        .await
        .unwrap();
    // Buffered far around an old position; seek to 100 keeps [95, 160].
    h.prefill(&[(80.0, 90.0), (95.0, 300.0)], 2_000_000).await;

    h.pipeline.on_seek(100.0).await.unwrap();

    let buffered = h.sink().buffered();
    assert_eq!(buffered.spans().first().map(|s| s.start), Some(95.0));
    assert!(buffered.end().unwrap() <= 160.0 + 1e-9);
}

#[tokio::test(start_paused = true)]
async fn overrun_discards_completed_download() {
    let mut h = harness_with(BufferOptions {
        buffering_target: 10.0,
        ..BufferOptions::default()
    });
    let now = Instant::now();
    let mut events = h.events.subscribe();

    h.pipeline
        .apply_representation(rep(0, 1000, 100), SwitchReason::Start, 0.0)
        .await
        .unwrap();
    h.pipeline.load_next(now, 0.0, None).await.unwrap();

    // While the download runs, the buffer grows past target + overrun
    // (level clamps at 1.5 * 10 = 15 > 10 + 4).
    h.prefill(&[(0.0, 30.0)], 2_000_000).await;

    while h.pipeline.has_active_downloads() {
        let outcome = h.pipeline.next_completion().await.unwrap();
        assert!(h.pipeline.on_download_complete(outcome, now, 0.0).is_none());
    }
    assert_eq!(h.pipeline.append_queue_len(), 0);

    let mut saw_discard = false;
    while let Ok(event) = events.try_recv() {
        if let Event::Pipeline(PipelineEvent::FragmentLoadingCompleted {
            discarded, reason, ..
        }) = event
        {
            if discarded {
                assert_eq!(reason.as_deref(), Some("buffer-overrun"));
                saw_discard = true;
            }
        }
    }
    assert!(saw_discard);
}

#[tokio::test(start_paused = true)]
async fn representation_change_cancels_and_reanchors() {
    let mut h = harness();
    let now = Instant::now();
    let low = rep(0, 1000, 100);
    let high = rep(3, 6000, 100);

    h.pipeline
        .apply_representation(low, SwitchReason::Start, 0.0)
        .await
        .unwrap();
    h.settle(now, 0.0, 2).await;
    let buffered_before = h.pipeline.buffered_segment_count();
    assert!(buffered_before > 0);
    h.pipeline.load_next(now, 0.0, None).await.unwrap();
    assert!(h.pipeline.has_active_downloads());

    h.pipeline
        .apply_representation(Arc::clone(&high), SwitchReason::Bandwidth, 0.0)
        .await
        .unwrap();

    // Queue cleared; in-flight work was cancelled and resolves to nothing.
    assert_eq!(h.pipeline.append_queue_len(), 0);
    while h.pipeline.has_active_downloads() {
        let outcome = h.pipeline.next_completion().await.unwrap();
        assert!(h.pipeline.on_download_complete(outcome, now, 0.0).is_none());
    }
    // Already-buffered media survives a change_type-capable sink.
    assert_eq!(h.pipeline.buffered_segment_count(), buffered_before);
    assert_eq!(
        h.pipeline.current_representation().map(|r| r.id),
        Some(high.id)
    );
}

#[tokio::test(start_paused = true)]
async fn prune_drops_media_behind_the_playhead() {
    let mut h = harness();
    h.pipeline
        .apply_representation(rep(0, 1000, 100), SwitchReason::Start, 0.0)
        .await
        .unwrap();
    h.prefill(&[(0.0, 60.0)], 2_000_000).await;

    // Playhead at 20, buffer_behind 5: [0, 15) goes.
    h.pipeline.prune(20.0).await.unwrap();
    let buffered = h.sink().buffered();
    assert_eq!(buffered.spans().first().map(|s| s.start), Some(15.0));

    // Within the retention window nothing changes.
    h.pipeline.prune(18.0).await.unwrap();
    assert_eq!(h.sink().buffered().spans().first().map(|s| s.start), Some(15.0));
}

#[tokio::test(start_paused = true)]
async fn buffered_map_syncs_with_external_eviction() {
    let mut h = harness();
    let now = Instant::now();
    h.pipeline
        .apply_representation(rep(0, 1000, 100), SwitchReason::Start, 0.0)
        .await
        .unwrap();
    h.settle(now, 0.0, 3).await;
    assert!(h.pipeline.buffered_segment(0).is_some());

    // A managed sink evicts the head behind our back; the next sync drops
    // the stale records.
    h.sink().evict(0.0, 8.0);
    h.pipeline.sync_buffered_segments();
    assert!(h.pipeline.buffered_segment(0).is_none());
    assert!(h.pipeline.buffered_segment(1).is_none());
    assert!(h.pipeline.buffered_segment(2).is_some());
}
