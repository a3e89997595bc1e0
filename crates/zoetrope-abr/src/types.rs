use zoetrope_core::RepresentationId;

/// Why a quality switch was requested.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SwitchReason {
    /// First selection for a track.
    Start,
    /// Explicit user override.
    ChosenByUser,
    /// Throughput strategy outcome.
    Bandwidth,
    /// BOLA buffer-based outcome.
    Buffer,
    /// Emergency downshift due to decode pressure.
    DroppedFrames,
}

impl SwitchReason {
    /// Reasons exempt from the switch cooldown accounting.
    pub fn is_exempt_from_cooldown(self) -> bool {
        matches!(self, Self::Start | Self::ChosenByUser | Self::DroppedFrames)
    }
}

/// Which strategy produced a decision.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StrategyKind {
    Buffer,
    Bandwidth,
    DroppedFrames,
}

/// A quality change the selector wants the pipeline to perform.
#[derive(Clone, Debug, PartialEq)]
pub struct SwitchRequest {
    /// Index into the selector's filtered representation list.
    pub index: usize,
    pub representation: RepresentationId,
    pub bitrate: u64,
    pub reason: SwitchReason,
}
