use std::collections::BTreeMap;

use zoetrope_core::BufferedSegmentInfo;
use zoetrope_sink::TimeRanges;

/// Map of segments known to be appended, keyed by segment number.
///
/// Kept coherent with the sink's reported ranges by [`Self::sync`], which is
/// run after every sink update: entries the sink no longer covers (browser
/// or explicit eviction) are dropped.
#[derive(Debug, Default)]
pub struct BufferedSegmentMap {
    segments: BTreeMap<u64, BufferedSegmentInfo>,
}

impl BufferedSegmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: BufferedSegmentInfo) {
        self.segments.insert(info.number, info);
    }

    pub fn get(&self, number: u64) -> Option<&BufferedSegmentInfo> {
        self.segments.get(&number)
    }

    pub fn remove(&mut self, number: u64) -> Option<BufferedSegmentInfo> {
        self.segments.remove(&number)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedSegmentInfo> {
        self.segments.values()
    }

    pub fn contains(&self, number: u64) -> bool {
        self.segments.contains_key(&number)
    }

    /// Drop every entry whose interval no longer overlaps any sink range.
    pub fn sync(&mut self, ranges: &TimeRanges) {
        self.segments.retain(|_, seg| {
            ranges
                .iter()
                .any(|span| seg.start < span.end && span.start < seg.end)
        });
    }

    /// Drop entries fully outside `[keep_start, keep_end]`.
    pub fn retain_window(&mut self, keep_start: f64, keep_end: f64) {
        self.segments
            .retain(|_, seg| seg.end > keep_start && seg.start < keep_end);
    }

    /// Replacement candidates after an up-switch to `current_bitrate`:
    /// still ahead of the playhead, starting at or past the safety horizon,
    /// and encoded below the current bitrate. Ascending start order, so the
    /// earliest deadline comes first.
    pub fn replacement_candidates(
        &self,
        playhead: f64,
        safety_horizon: f64,
        current_bitrate: u64,
    ) -> Vec<&BufferedSegmentInfo> {
        self.segments
            .values()
            .filter(|seg| {
                seg.end > playhead && seg.start >= safety_horizon && seg.bitrate < current_bitrate
            })
            .collect()
    }
}

/// Effective buffer level ahead of `playhead` (§ buffered view).
///
/// Future ranges count fully; small gaps the stall handler is expected to
/// jump count as buffered too. A gap is jumpable below `gap_tolerance`, or
/// below `buffering_target` for the first gap right at the playhead. The
/// result is clamped to `1.5 × buffering_target`.
pub fn effective_buffer_level(
    ranges: &TimeRanges,
    playhead: f64,
    buffering_target: f64,
    gap_tolerance: f64,
) -> f64 {
    let spans = ranges.spans_from(playhead);
    let mut level = 0.0;
    let mut cursor = playhead;
    let mut first = true;

    for span in spans {
        let gap = span.start - cursor;
        if gap > 0.0 {
            let jumpable = gap < gap_tolerance || (first && gap < buffering_target);
            if !jumpable {
                break;
            }
            level += gap;
        }
        level += span.end - span.start.max(cursor);
        cursor = span.end;
        first = false;
    }

    level.min(buffering_target * 1.5)
}
