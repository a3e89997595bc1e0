/// Half-open time interval `[start, end)` in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeSpan {
    pub start: f64,
    pub end: f64,
}

impl TimeSpan {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }

    pub fn overlaps(&self, other: &TimeSpan) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Ordered, disjoint list of buffered intervals, the shape a media sink
/// reports via `buffered()`.
///
/// Adjacent or overlapping spans merge on insert; removal handles every
/// overlap topology (before, after, overlapping either edge, spanning,
/// fully inside — the inside case splits the span).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimeRanges {
    spans: Vec<TimeSpan>,
}

impl TimeRanges {
    /// Spans closer than this merge into one range.
    const MERGE_EPSILON: f64 = 1e-6;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_spans(mut spans: Vec<TimeSpan>) -> Self {
        spans.retain(|s| s.duration() > 0.0);
        spans.sort_by(|a, b| a.start.total_cmp(&b.start));
        let mut out = Self::new();
        for span in spans {
            out.add(span);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimeSpan> {
        self.spans.iter()
    }

    pub fn spans(&self) -> &[TimeSpan] {
        &self.spans
    }

    /// Insert a span, merging with neighbours it touches.
    pub fn add(&mut self, span: TimeSpan) {
        if span.duration() <= 0.0 {
            return;
        }
        let mut merged = span;
        let mut out = Vec::with_capacity(self.spans.len() + 1);
        for &existing in &self.spans {
            if existing.end + Self::MERGE_EPSILON < merged.start {
                out.push(existing);
            } else if merged.end + Self::MERGE_EPSILON < existing.start {
                // Past the insertion point; nothing further can merge.
                out.push(existing);
            } else {
                merged = TimeSpan::new(
                    merged.start.min(existing.start),
                    merged.end.max(existing.end),
                );
            }
        }
        out.push(merged);
        out.sort_by(|a, b| a.start.total_cmp(&b.start));
        self.spans = out;
    }

    /// Remove `[start, end)` from every span it intersects.
    pub fn remove(&mut self, start: f64, end: f64) {
        if end <= start {
            return;
        }
        let mut out = Vec::with_capacity(self.spans.len() + 1);
        for &span in &self.spans {
            if span.end <= start || span.start >= end {
                out.push(span);
                continue;
            }
            if span.start < start {
                out.push(TimeSpan::new(span.start, start));
            }
            if span.end > end {
                out.push(TimeSpan::new(end, span.end));
            }
        }
        self.spans = out;
    }

    pub fn clear(&mut self) {
        self.spans.clear();
    }

    /// Span containing `time`, if any.
    pub fn span_at(&self, time: f64) -> Option<TimeSpan> {
        self.spans.iter().find(|s| s.contains(time)).copied()
    }

    pub fn contains(&self, time: f64) -> bool {
        self.span_at(time).is_some()
    }

    /// First span starting at or after `time`.
    pub fn next_span_after(&self, time: f64) -> Option<TimeSpan> {
        self.spans.iter().find(|s| s.start >= time).copied()
    }

    /// Spans intersecting `[from, +inf)`, clipped at `from`.
    pub fn spans_from(&self, from: f64) -> Vec<TimeSpan> {
        self.spans
            .iter()
            .filter(|s| s.end > from)
            .map(|s| TimeSpan::new(s.start.max(from), s.end))
            .collect()
    }

    pub fn end(&self) -> Option<f64> {
        self.spans.last().map(|s| s.end)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn ranges(pairs: &[(f64, f64)]) -> TimeRanges {
        TimeRanges::from_spans(pairs.iter().map(|&(s, e)| TimeSpan::new(s, e)).collect())
    }

    fn pairs(r: &TimeRanges) -> Vec<(f64, f64)> {
        r.iter().map(|s| (s.start, s.end)).collect()
    }

    #[test]
    fn add_merges_adjacent_and_overlapping() {
        let mut r = TimeRanges::new();
        r.add(TimeSpan::new(0.0, 4.0));
        r.add(TimeSpan::new(4.0, 8.0));
        r.add(TimeSpan::new(7.0, 10.0));
        assert_eq!(pairs(&r), vec![(0.0, 10.0)]);

        r.add(TimeSpan::new(20.0, 24.0));
        assert_eq!(r.len(), 2);
    }

    #[rstest]
    // Six overlap topologies against a [10, 20) span.
    #[case((0.0, 5.0), vec![(10.0, 20.0)])] // fully before
    #[case((25.0, 30.0), vec![(10.0, 20.0)])] // fully after
    #[case((5.0, 12.0), vec![(12.0, 20.0)])] // overlapping start
    #[case((18.0, 25.0), vec![(10.0, 18.0)])] // overlapping end
    #[case((5.0, 25.0), vec![])] // spanning
    #[case((12.0, 15.0), vec![(10.0, 12.0), (15.0, 20.0)])] // inside: split
    fn remove_handles_all_overlap_cases(
        #[case] removal: (f64, f64),
        #[case] expected: Vec<(f64, f64)>,
    ) {
        let mut r = ranges(&[(10.0, 20.0)]);
        r.remove(removal.0, removal.1);
        assert_eq!(pairs(&r), expected);
    }

    #[test]
    fn remove_across_multiple_spans() {
        let mut r = ranges(&[(0.0, 5.0), (10.0, 20.0), (30.0, 40.0)]);
        r.remove(3.0, 35.0);
        assert_eq!(pairs(&r), vec![(0.0, 3.0), (35.0, 40.0)]);
    }

    #[test]
    fn span_queries() {
        let r = ranges(&[(5.0, 30.0), (30.5, 60.0)]);
        assert!(r.contains(5.0));
        assert!(!r.contains(30.2));
        assert_eq!(r.span_at(10.0), Some(TimeSpan::new(5.0, 30.0)));
        assert_eq!(
            r.next_span_after(30.2),
            Some(TimeSpan::new(30.5, 60.0))
        );
        assert_eq!(r.end(), Some(60.0));
    }

    #[test]
    fn spans_from_clips_at_position() {
        let r = ranges(&[(0.0, 10.0), (15.0, 20.0)]);
        let future = r.spans_from(4.0);
        assert_eq!(future.len(), 2);
        assert_eq!(future[0], TimeSpan::new(4.0, 10.0));
        assert_eq!(future[1], TimeSpan::new(15.0, 20.0));
    }
}
