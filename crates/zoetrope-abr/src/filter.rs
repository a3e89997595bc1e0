use std::sync::Arc;

use tracing::debug;
use zoetrope_core::Representation;

/// Inputs of the two-pass representation filter.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FilterInputs {
    /// Explicit bitrate cap in bits per second.
    pub bitrate_cap: Option<u64>,
    /// Screen dimensions in CSS pixels.
    pub screen_width: u32,
    pub screen_height: u32,
    pub pixel_ratio: f64,
    /// Actual video display size, when known; clamps the target below the
    /// screen size.
    pub display_width: Option<u32>,
    pub display_height: Option<u32>,
}

impl FilterInputs {
    fn target(&self) -> (f64, f64) {
        let dpr = if self.pixel_ratio > 0.0 {
            self.pixel_ratio
        } else {
            1.0
        };
        let w = self
            .display_width
            .map_or(self.screen_width, |d| d.min(self.screen_width));
        let h = self
            .display_height
            .map_or(self.screen_height, |d| d.min(self.screen_height));
        (f64::from(w) * dpr, f64::from(h) * dpr)
    }
}

/// Two-pass filter over a video representation list.
///
/// Pass 1 drops representations over the explicit bitrate cap. Pass 2 finds
/// the smallest resolution that still covers the display target and drops
/// anything larger. An empty outcome is softened to the single lowest-bitrate
/// representation.
pub fn filter_representations(
    reps: &[Arc<Representation>],
    inputs: &FilterInputs,
) -> Vec<Arc<Representation>> {
    let mut out: Vec<Arc<Representation>> = reps
        .iter()
        .filter(|r| inputs.bitrate_cap.is_none_or(|cap| r.bitrate <= cap))
        .cloned()
        .collect();

    if inputs.screen_width > 0 && inputs.screen_height > 0 {
        let (tw, th) = inputs.target();
        let cap_res = out
            .iter()
            .filter(|r| f64::from(r.width) >= tw && f64::from(r.height) >= th)
            .map(|r| (r.width, r.height))
            .min_by_key(|&(w, h)| (u64::from(w)) * (u64::from(h)));
        if let Some((cw, ch)) = cap_res {
            out.retain(|r| r.width <= cw && r.height <= ch);
        }
    }

    if out.is_empty() {
        // Soft restriction: never leave the selector without a choice.
        if let Some(lowest) = reps.iter().min_by_key(|r| r.bitrate) {
            debug!(
                bitrate = lowest.bitrate,
                "representation filter emptied the set, keeping lowest"
            );
            out.push(Arc::clone(lowest));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use zoetrope_core::{RepresentationId, SegmentIndex, TrackKind};

    use super::*;

    fn rep(id: u32, bitrate_kbps: u64, width: u32, height: u32) -> Arc<Representation> {
        Arc::new(Representation {
            id: RepresentationId(id),
            kind: TrackKind::Video,
            bitrate: bitrate_kbps * 1000,
            mime_type: "video/mp4".into(),
            codecs: "avc1.64001f".into(),
            width,
            height,
            frame_rate: 30.0,
            init_url: None,
            index: SegmentIndex::default(),
        })
    }

    fn ladder() -> Vec<Arc<Representation>> {
        vec![
            rep(0, 400, 640, 360),
            rep(1, 1000, 960, 540),
            rep(2, 3000, 1280, 720),
            rep(3, 6000, 1920, 1080),
        ]
    }

    #[test]
    fn bitrate_cap_drops_rich_representations() {
        let inputs = FilterInputs {
            bitrate_cap: Some(2_000_000),
            ..FilterInputs::default()
        };
        let out = filter_representations(&ladder(), &inputs);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.bitrate <= 2_000_000));
    }

    #[test]
    fn resolution_filter_keeps_smallest_covering_rendition() {
        // 720p window on a 1x display: 1280x720 covers it, 1080p is waste.
        let inputs = FilterInputs {
            screen_width: 1280,
            screen_height: 720,
            pixel_ratio: 1.0,
            ..FilterInputs::default()
        };
        let out = filter_representations(&ladder(), &inputs);
        assert_eq!(out.last().map(|r| r.height), Some(720));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn pixel_ratio_scales_the_target() {
        // 960x540 CSS window at 2x needs 1920x1080 physical pixels.
        let inputs = FilterInputs {
            screen_width: 960,
            screen_height: 540,
            pixel_ratio: 2.0,
            ..FilterInputs::default()
        };
        let out = filter_representations(&ladder(), &inputs);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn display_size_clamps_below_screen() {
        let inputs = FilterInputs {
            screen_width: 1920,
            screen_height: 1080,
            pixel_ratio: 1.0,
            display_width: Some(640),
            display_height: Some(360),
            ..FilterInputs::default()
        };
        let out = filter_representations(&ladder(), &inputs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].width, 640);
    }

    #[test]
    fn target_above_every_rendition_keeps_all() {
        let inputs = FilterInputs {
            screen_width: 3840,
            screen_height: 2160,
            pixel_ratio: 1.0,
            ..FilterInputs::default()
        };
        assert_eq!(filter_representations(&ladder(), &inputs).len(), 4);
    }

    #[test]
    fn empty_result_softens_to_lowest_bitrate() {
        let inputs = FilterInputs {
            bitrate_cap: Some(100_000),
            ..FilterInputs::default()
        };
        let out = filter_representations(&ladder(), &inputs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, RepresentationId(0));
    }
}
