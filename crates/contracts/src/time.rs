//! Clock domains
//!
//! Node 与 Host 各自的时钟用不同的类型表示，跨流比较前必须经过一次偏移校正。

use serde::{Deserialize, Serialize};
use std::ops::Sub;
use std::sync::atomic::{AtomicU64, Ordering};

/// Timestamp on the Node clock (Unix seconds)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeTime(pub f64);

/// Timestamp on the Host clock (Unix seconds)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostTime(pub f64);

impl NodeTime {
    pub fn secs(self) -> f64 {
        self.0
    }
}

impl HostTime {
    pub fn secs(self) -> f64 {
        self.0
    }

    /// Shift by a (possibly negative) number of seconds
    pub fn offset_by(self, secs: f64) -> HostTime {
        HostTime(self.0 + secs)
    }

    /// Absolute distance in seconds
    pub fn abs_diff(self, other: HostTime) -> f64 {
        (self.0 - other.0).abs()
    }
}

impl Sub for HostTime {
    type Output = f64;

    fn sub(self, rhs: HostTime) -> f64 {
        self.0 - rhs.0
    }
}

/// Node − Host clock offset in seconds
///
/// Computed once per run by the sync exchange. `correct` is the only way to
/// turn a [`NodeTime`] into a [`HostTime`], so a sample cannot be corrected twice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockOffset {
    seconds: f64,
}

impl ClockOffset {
    pub fn from_secs(seconds: f64) -> Self {
        Self { seconds }
    }

    /// `offset = T_node − T_send`
    pub fn from_exchange(node_reply: NodeTime, host_send: HostTime) -> Self {
        Self::from_secs(node_reply.0 - host_send.0)
    }

    pub fn secs(&self) -> f64 {
        self.seconds
    }

    pub fn millis(&self) -> f64 {
        self.seconds * 1000.0
    }

    /// `corrected = raw − offset`
    pub fn correct(&self, raw: NodeTime) -> HostTime {
        HostTime(raw.0 - self.seconds)
    }
}

/// Source of Host time
///
/// Every Host-side timestamp (sample stamps, `T_send`, `T_recv`, deadlines)
/// comes from one clock so that tests can drive it.
pub trait HostClock: Send + Sync {
    fn now(&self) -> HostTime;
}

impl<C: HostClock + ?Sized> HostClock for std::sync::Arc<C> {
    fn now(&self) -> HostTime {
        (**self).now()
    }
}

/// Hand-driven clock for tests
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: HostTime) -> Self {
        Self {
            bits: AtomicU64::new(start.0.to_bits()),
        }
    }

    pub fn set(&self, t: HostTime) {
        self.bits.store(t.0.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, secs: f64) {
        let now = self.now();
        self.set(now.offset_by(secs));
    }
}

impl HostClock for ManualClock {
    fn now(&self) -> HostTime {
        HostTime(f64::from_bits(self.bits.load(Ordering::SeqCst)))
    }
}
