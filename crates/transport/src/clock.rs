//! Wall clock that follows the tokio timer.
//!
//! Anchors Unix time once and advances with `tokio::time::Instant`, so under a
//! paused test runtime it moves exactly as far as the virtual timer does.

use std::time::{SystemTime, UNIX_EPOCH};

use contracts::{HostClock, HostTime};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct TokioWallClock {
    anchor_unix: f64,
    anchor: Instant,
    skew_s: f64,
}

impl TokioWallClock {
    pub fn new() -> Self {
        let anchor_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or_default();
        Self::anchored_at(anchor_unix)
    }

    /// Start at an explicit Unix time
    pub fn anchored_at(anchor_unix: f64) -> Self {
        Self {
            anchor_unix,
            anchor: Instant::now(),
            skew_s: 0.0,
        }
    }

    /// Same timeline shifted by `skew_s` (a second device's clock)
    pub fn skewed(&self, skew_s: f64) -> Self {
        Self {
            skew_s: self.skew_s + skew_s,
            ..*self
        }
    }

    pub fn now_secs(&self) -> f64 {
        self.anchor_unix + self.skew_s + self.anchor.elapsed().as_secs_f64()
    }
}

impl Default for TokioWallClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HostClock for TokioWallClock {
    fn now(&self) -> HostTime {
        HostTime(self.now_secs())
    }
}
