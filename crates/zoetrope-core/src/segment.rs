use url::Url;

use crate::representation::RepresentationId;

/// Template data for producing segment fetch URLs.
///
/// Stored as plain data so a [`SegmentReference`] is comparable and testable;
/// `$Number$` in the pattern is substituted at URI production time.
#[derive(Clone, Debug, PartialEq)]
pub struct UrlTemplate {
    pub base: Url,
    pub media_pattern: String,
}

impl UrlTemplate {
    pub fn new(base: Url, media_pattern: impl Into<String>) -> Self {
        Self {
            base,
            media_pattern: media_pattern.into(),
        }
    }

    /// Resolve the pattern for `number` against the base URL.
    ///
    /// The pattern is manifest-provided and assumed joinable; a pattern that
    /// fails to join falls back to the base URL itself so the reference stays
    /// usable (the fetch will then 404 and the segment gets blacklisted).
    pub fn resolve(&self, number: u64) -> Url {
        let path = self.media_pattern.replace("$Number$", &number.to_string());
        self.base.join(&path).unwrap_or_else(|_| self.base.clone())
    }
}

/// Addressable media segment within one representation.
///
/// Time interval is `[start, end)` in seconds, monotonic within one
/// representation.
#[derive(Clone, Debug, PartialEq)]
pub struct SegmentReference {
    pub number: u64,
    pub start: f64,
    pub end: f64,
    pub template: UrlTemplate,
}

impl SegmentReference {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Fetch URL for this segment. Pure function of stored data.
    pub fn uri(&self) -> Url {
        self.template.resolve(self.number)
    }

    pub fn contains(&self, time: f64) -> bool {
        time >= self.start && time < self.end
    }
}

/// Ordered sequence of segment references for one representation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SegmentIndex {
    refs: Vec<SegmentReference>,
}

impl SegmentIndex {
    /// Build from references already ordered by start time / number.
    pub fn new(refs: Vec<SegmentReference>) -> Self {
        debug_assert!(refs.windows(2).all(|w| w[0].start <= w[1].start));
        Self { refs }
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentReference> {
        self.refs.iter()
    }

    /// Segment covering `time`, by binary search over start times.
    pub fn at(&self, time: f64) -> Option<&SegmentReference> {
        let idx = self.refs.partition_point(|r| r.end <= time);
        self.refs.get(idx).filter(|r| r.contains(time))
    }

    /// Direct index lookup with fallback scan for sparse numbering.
    pub fn by_number(&self, number: u64) -> Option<&SegmentReference> {
        let first = self.refs.first()?.number;
        if let Some(r) = number
            .checked_sub(first)
            .and_then(|off| self.refs.get(off as usize))
        {
            if r.number == number {
                return Some(r);
            }
        }
        self.refs.iter().find(|r| r.number == number)
    }

    pub fn next(&self, reference: &SegmentReference) -> Option<&SegmentReference> {
        self.by_number(reference.number + 1)
            .or_else(|| self.refs.iter().find(|r| r.number > reference.number))
    }

    pub fn first(&self) -> Option<&SegmentReference> {
        self.refs.first()
    }

    pub fn last(&self) -> Option<&SegmentReference> {
        self.refs.last()
    }

    /// Mean segment duration in seconds, zero for an empty index.
    pub fn average_duration(&self) -> f64 {
        if self.refs.is_empty() {
            return 0.0;
        }
        let total: f64 = self.refs.iter().map(SegmentReference::duration).sum();
        total / self.refs.len() as f64
    }
}

/// Record of a segment successfully appended to the media sink.
///
/// Kept coherent with the sink's buffered ranges by the pipeline's sync pass.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferedSegmentInfo {
    pub number: u64,
    pub start: f64,
    pub end: f64,
    pub representation: RepresentationId,
    pub bitrate: u64,
    pub byte_size: usize,
}
