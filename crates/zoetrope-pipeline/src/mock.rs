//! Test doubles shared by this crate's tests and downstream crates.

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use url::Url;
use zoetrope_core::VideoPlaybackQuality;
use zoetrope_net::{FetchResponse, Fetcher, NetError, NetResult};

use crate::playback::PlaybackHandle;

#[derive(Debug, Default)]
struct PlaybackState {
    position: f64,
    duration: Option<f64>,
    paused: bool,
    seeking: bool,
    rate: f64,
    quality: VideoPlaybackQuality,
    seeks: Vec<f64>,
}

/// Scriptable [`PlaybackHandle`].
#[derive(Clone, Debug, Default)]
pub struct MockPlayback {
    state: Arc<Mutex<PlaybackState>>,
}

impl MockPlayback {
    pub fn new() -> Self {
        let state = PlaybackState {
            rate: 1.0,
            ..PlaybackState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn set_position(&self, position: f64) {
        self.state.lock().position = position;
    }

    pub fn set_duration(&self, duration: Option<f64>) {
        self.state.lock().duration = duration;
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    pub fn set_seeking(&self, seeking: bool) {
        self.state.lock().seeking = seeking;
    }

    pub fn set_quality(&self, quality: VideoPlaybackQuality) {
        self.state.lock().quality = quality;
    }

    /// Seek targets requested through [`PlaybackHandle::seek_to`].
    pub fn requested_seeks(&self) -> Vec<f64> {
        self.state.lock().seeks.clone()
    }
}

impl PlaybackHandle for MockPlayback {
    fn position(&self) -> f64 {
        self.state.lock().position
    }

    fn duration(&self) -> Option<f64> {
        self.state.lock().duration
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn is_seeking(&self) -> bool {
        self.state.lock().seeking
    }

    fn playback_rate(&self) -> f64 {
        self.state.lock().rate
    }

    fn video_quality(&self) -> VideoPlaybackQuality {
        self.state.lock().quality
    }

    fn seek_to(&self, time: f64) {
        let mut state = self.state.lock();
        state.seeks.push(time);
        state.position = time;
    }
}

/// One scripted fetch behavior.
#[derive(Clone, Debug)]
pub enum ScriptedResponse {
    /// Succeed with a payload of this size after the given transfer time.
    Ok { bytes: usize, elapsed: Duration },
    /// Succeed, but flagged as served from cache.
    CacheHit { bytes: usize },
    /// Fail with an HTTP status.
    Status(u16),
    /// Fail with a timeout after the given wait.
    Timeout(Duration),
}

#[derive(Default)]
struct FetcherState {
    scripted: HashMap<Url, VecDeque<ScriptedResponse>>,
    requests: Vec<Url>,
}

/// Deterministic [`Fetcher`]: per-URL scripted responses with a configurable
/// default. Transfer time is simulated with the tokio clock, so tests using
/// `start_paused` advance instantly.
#[derive(Clone)]
pub struct ScriptedFetcher {
    default: ScriptedResponse,
    state: Arc<Mutex<FetcherState>>,
}

impl ScriptedFetcher {
    pub fn new(default: ScriptedResponse) -> Self {
        Self {
            default,
            state: Arc::new(Mutex::new(FetcherState::default())),
        }
    }

    /// 500 KB in 100 ms, a comfortable 40 Mbps default.
    pub fn fast() -> Self {
        Self::new(ScriptedResponse::Ok {
            bytes: 500_000,
            elapsed: Duration::from_millis(100),
        })
    }

    pub fn script(&self, url: Url, response: ScriptedResponse) {
        self.state
            .lock()
            .scripted
            .entry(url)
            .or_default()
            .push_back(response);
    }

    pub fn requests(&self) -> Vec<Url> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: Url, cancel: CancellationToken) -> NetResult<FetchResponse> {
        let response = {
            let mut state = self.state.lock();
            state.requests.push(url.clone());
            state
                .scripted
                .get_mut(&url)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| self.default.clone())
        };

        match response {
            ScriptedResponse::Ok { bytes, elapsed } => {
                tokio::select! {
                    () = tokio::time::sleep(elapsed) => {}
                    () = cancel.cancelled() => return Err(NetError::Cancelled),
                }
                Ok(FetchResponse {
                    bytes: Bytes::from(vec![0u8; bytes]),
                    status: 200,
                    elapsed,
                    transferred_bytes: bytes as u64,
                    resource_bytes: bytes as u64,
                })
            }
            ScriptedResponse::CacheHit { bytes } => Ok(FetchResponse {
                bytes: Bytes::from(vec![0u8; bytes]),
                status: 200,
                elapsed: Duration::from_millis(1),
                transferred_bytes: 0,
                resource_bytes: bytes as u64,
            }),
            ScriptedResponse::Status(status) => Err(NetError::Status { status }),
            ScriptedResponse::Timeout(wait) => {
                tokio::select! {
                    () = tokio::time::sleep(wait) => {}
                    () = cancel.cancelled() => return Err(NetError::Cancelled),
                }
                Err(NetError::Timeout)
            }
        }
    }
}
