//! PositionSource trait - imaging collaborator
//!
//! The imaging pipeline turns camera frames into object positions. The Host
//! polls it at its own cadence; the call must return quickly.

use crate::{HostSample, HostTime};

/// Position data source
///
/// Implemented by the live tracker, the synthetic mock and the replay source.
pub trait PositionSource: Send {
    /// Source name (used for logging)
    fn name(&self) -> &str;

    /// Take one sample stamped with `now`
    ///
    /// A frame without a detection yields a sample whose coordinates are `None`.
    fn sample(&mut self, now: HostTime) -> HostSample;

    /// Release the underlying device
    fn release(&mut self) {}
}
