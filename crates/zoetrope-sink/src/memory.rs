use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use crate::{
    error::{SinkError, SinkResult},
    ranges::{TimeRanges, TimeSpan},
    traits::{MediaSink, SinkFactory, SinkState},
};

#[derive(Debug, Default)]
struct Inner {
    ranges: TimeRanges,
    /// Appended payloads with their covered spans.
    items: Vec<(TimeSpan, usize)>,
    state: SinkState,
    mime: String,
    codecs: String,
    quota_bytes: Option<usize>,
    /// One-shot scripted failures consumed by successive appends.
    scripted_failures: VecDeque<SinkError>,
    change_type_supported: bool,
    managed: bool,
    append_count: u64,
    remove_count: u64,
    abort_count: u64,
}

impl Inner {
    fn bytes_buffered(&self) -> usize {
        self.items.iter().map(|(_, len)| len).sum()
    }
}

/// In-memory [`MediaSink`] used across the workspace's tests.
///
/// Tracks buffered ranges from the declared append spans, enforces an
/// optional byte quota and supports scripting one-shot failures.
#[derive(Debug)]
pub struct MemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_inner(Inner {
            state: SinkState::Open,
            change_type_supported: true,
            ..Inner::default()
        })
    }

    fn with_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    /// Cloneable handle onto the same sink state, for inspection after the
    /// sink itself moved into the pipeline.
    pub fn handle(&self) -> SharedMemorySink {
        SharedMemorySink {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn set_quota_bytes(&self, quota: Option<usize>) {
        self.lock().quota_bytes = quota;
    }

    pub fn set_change_type_supported(&self, supported: bool) {
        self.lock().change_type_supported = supported;
    }

    pub fn set_managed(&self, managed: bool) {
        self.lock().managed = managed;
    }

    /// Queue a failure for an upcoming append.
    pub fn script_failure(&self, error: SinkError) {
        self.lock().scripted_failures.push_back(error);
    }

    fn lock(&self) -> parking_lot::MutexGuard<'_, Inner> {
        self.inner.lock()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable view of a [`MemorySink`], used by tests to observe and mutate
/// sink state (external eviction, quota changes) while the pipeline owns the
/// sink.
#[derive(Clone, Debug)]
pub struct SharedMemorySink {
    inner: Arc<Mutex<Inner>>,
}

impl SharedMemorySink {
    fn lock(&self) -> parking_lot::MutexGuard<'_, Inner> {
        self.inner.lock()
    }

    pub fn buffered(&self) -> TimeRanges {
        self.lock().ranges.clone()
    }

    pub fn bytes_buffered(&self) -> usize {
        self.lock().bytes_buffered()
    }

    pub fn append_count(&self) -> u64 {
        self.lock().append_count
    }

    pub fn remove_count(&self) -> u64 {
        self.lock().remove_count
    }

    pub fn abort_count(&self) -> u64 {
        self.lock().abort_count
    }

    pub fn content_type(&self) -> (String, String) {
        let inner = self.lock();
        (inner.mime.clone(), inner.codecs.clone())
    }

    pub fn set_quota_bytes(&self, quota: Option<usize>) {
        self.lock().quota_bytes = quota;
    }

    pub fn script_failure(&self, error: SinkError) {
        self.lock().scripted_failures.push_back(error);
    }

    /// Evict a range behind the pipeline's back, as a managed (browser)
    /// sink would.
    pub fn evict(&self, start: f64, end: f64) {
        let mut inner = self.lock();
        inner.ranges.remove(start, end);
        inner.items.retain(|(span, _)| !(span.start >= start && span.end <= end));
    }
}

fn do_append(inner: &mut Inner, bytes: &Bytes, span: TimeSpan) -> SinkResult<()> {
    if inner.state != SinkState::Open {
        return Err(SinkError::InvalidState(inner.state.to_string()));
    }
    if let Some(scripted) = inner.scripted_failures.pop_front() {
        return Err(scripted);
    }
    if let Some(quota) = inner.quota_bytes {
        if inner.bytes_buffered() + bytes.len() > quota {
            return Err(SinkError::QuotaExceeded);
        }
    }
    inner.items.push((span, bytes.len()));
    inner.ranges.add(span);
    inner.append_count += 1;
    Ok(())
}

fn do_remove(inner: &mut Inner, start: f64, end: f64) -> SinkResult<()> {
    if inner.state == SinkState::Closed {
        return Err(SinkError::Closed);
    }
    inner.ranges.remove(start, end);
    let mut kept = Vec::with_capacity(inner.items.len());
    for (span, len) in inner.items.drain(..) {
        if span.start >= start && span.end <= end {
            continue; // fully removed
        }
        if span.end <= start || span.start >= end {
            kept.push((span, len));
            continue;
        }
        // Partial overlap: keep the surviving part with prorated bytes.
        let keep_start = if span.start < start { span.start } else { end };
        let keep_end = if span.start < start { start } else { span.end };
        let kept_span = TimeSpan::new(keep_start, keep_end);
        let fraction = kept_span.duration() / span.duration().max(f64::EPSILON);
        kept.push((kept_span, (len as f64 * fraction) as usize));
    }
    inner.items = kept;
    inner.remove_count += 1;
    Ok(())
}

macro_rules! impl_media_sink {
    ($ty:ty) => {
        #[async_trait]
        impl MediaSink for $ty {
            async fn append(&mut self, bytes: Bytes, span: TimeSpan) -> SinkResult<()> {
                // Yield once so the completion is asynchronous like a real
                // updateend notification.
                tokio::task::yield_now().await;
                do_append(&mut self.lock(), &bytes, span)
            }

            async fn remove(&mut self, start: f64, end: f64) -> SinkResult<()> {
                tokio::task::yield_now().await;
                do_remove(&mut self.lock(), start, end)
            }

            fn buffered(&self) -> TimeRanges {
                self.lock().ranges.clone()
            }

            fn state(&self) -> SinkState {
                self.lock().state
            }

            async fn abort(&mut self) -> SinkResult<()> {
                self.lock().abort_count += 1;
                Ok(())
            }

            fn change_type(&mut self, mime: &str, codecs: &str) -> SinkResult<bool> {
                let mut inner = self.lock();
                if inner.state != SinkState::Open {
                    return Err(SinkError::InvalidState(inner.state.to_string()));
                }
                if !inner.change_type_supported {
                    return Ok(false);
                }
                inner.mime = mime.to_string();
                inner.codecs = codecs.to_string();
                Ok(true)
            }

            async fn close(&mut self) -> SinkResult<()> {
                self.lock().state = SinkState::Closed;
                Ok(())
            }

            fn is_managed(&self) -> bool {
                self.lock().managed
            }
        }
    };
}

impl_media_sink!(MemorySink);
impl_media_sink!(SharedMemorySink);

/// [`SinkFactory`] producing [`MemorySink`]s.
///
/// Cloneable; every clone shares the record of the most recently opened
/// sink, so tests keep a clone and observe sinks created after the factory
/// moved into the pipeline.
#[derive(Clone, Debug, Default)]
pub struct MemorySinkFactory {
    pub managed: bool,
    pub quota_bytes: Option<usize>,
    last: Arc<Mutex<Option<SharedMemorySink>>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sink(&self) -> Option<SharedMemorySink> {
        self.last.lock().clone()
    }
}

impl SinkFactory for MemorySinkFactory {
    fn open(&mut self, mime: &str, codecs: &str) -> SinkResult<Box<dyn MediaSink>> {
        let sink = MemorySink::new();
        sink.set_managed(self.managed);
        sink.set_quota_bytes(self.quota_bytes);
        {
            let mut inner = sink.lock();
            inner.mime = mime.to_string();
            inner.codecs = codecs.to_string();
        }
        *self.last.lock() = Some(sink.handle());
        Ok(Box::new(sink))
    }
}
