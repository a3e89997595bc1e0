//! Adaptive bitrate decision making.
//!
//! Three cooperating pieces:
//!
//! - [`BandwidthEstimator`]: dual-EWMA throughput estimation over download
//!   samples, blended with a platform network hint while samples are scarce.
//! - [`BolaController`]: buffer-based quality control (BOLA) with startup,
//!   steady-state and single-bitrate modes and a placeholder-buffer account.
//! - [`QualitySelector`]: composes BOLA with a throughput strategy and a
//!   dropped-frames emergency path, then applies cooldown, smoothing and
//!   oscillation suppression before a switch is requested.
//!
//! The selector never performs I/O; callers feed it buffer level, bandwidth
//! and decode-quality observations and act on the returned switch requests.

#![forbid(unsafe_code)]

mod bola;
mod estimator;
mod filter;
mod selector;
mod strategy;
mod types;

pub use bola::{BolaChoice, BolaController, BolaMode};
pub use estimator::BandwidthEstimator;
pub use filter::{FilterInputs, filter_representations};
pub use selector::{QualityCheckInputs, QualitySelector};
pub use strategy::{DroppedFramesMonitor, ThroughputStrategy};
pub use types::{StrategyKind, SwitchReason, SwitchRequest};
