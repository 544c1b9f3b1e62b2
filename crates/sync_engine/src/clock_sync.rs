//! Single round-trip clock offset estimation.
//!
//! Host sends `sync` at `T_send`, Node answers `sync_ts:<T_node>`, Host reads
//! the reply at `T_recv`:
//!
//! - `offset = T_node − T_send`
//! - `rtt = T_recv − T_send` (diagnostic only)
//!
//! The estimator owns attempt counting and the overall deadline; the caller
//! owns the I/O.

use std::time::Duration;

use contracts::{ClockOffset, HandshakeConfig, HostTime, NodeMessage, NodeTime};
use tracing::{info, instrument, warn};

use crate::SyncError;

/// Clock sync settings
#[derive(Debug, Clone, Copy)]
pub struct ClockSyncConfig {
    /// Overall deadline measured from the first `sync`
    pub timeout: Duration,
    /// Maximum number of `sync` sends
    pub max_attempts: u32,
    /// |offset| above this is logged as a warning (ms)
    pub warn_threshold_ms: f64,
}

impl Default for ClockSyncConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_attempts: 3,
            warn_threshold_ms: 100.0,
        }
    }
}

impl From<&HandshakeConfig> for ClockSyncConfig {
    fn from(config: &HandshakeConfig) -> Self {
        Self {
            timeout: Duration::from_secs_f64(config.sync_timeout_s),
            max_attempts: config.max_sync_attempts.max(1),
            warn_threshold_ms: config.offset_warn_ms,
        }
    }
}

/// Outcome of a successful exchange
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncEstimate {
    pub offset: ClockOffset,
    pub rtt_s: f64,
    pub attempts: u32,
    /// |offset| exceeded the warning threshold
    pub large_offset: bool,
}

/// Per-run offset estimator
#[derive(Debug)]
pub struct ClockSyncEstimator {
    config: ClockSyncConfig,
    attempts: u32,
    first_sent: Option<HostTime>,
    last_sent: Option<HostTime>,
    estimate: Option<SyncEstimate>,
}

impl ClockSyncEstimator {
    pub fn new(config: ClockSyncConfig) -> Self {
        Self {
            config,
            attempts: 0,
            first_sent: None,
            last_sent: None,
            estimate: None,
        }
    }

    /// Record that `sync` was sent at `t_send`; returns the attempt number
    pub fn begin_attempt(&mut self, t_send: HostTime) -> Result<u32, SyncError> {
        if self.attempts >= self.config.max_attempts {
            return Err(SyncError::AttemptsExhausted {
                attempts: self.attempts,
            });
        }
        self.attempts += 1;
        self.first_sent.get_or_insert(t_send);
        self.last_sent = Some(t_send);
        Ok(self.attempts)
    }

    /// Parse a raw `sync_ts:<float>` frame
    pub fn parse_reply(frame: &str) -> Result<NodeTime, SyncError> {
        match NodeMessage::parse(frame) {
            Ok(NodeMessage::SyncTs(t)) => Ok(t),
            _ => Err(SyncError::MalformedReply {
                frame: frame.trim().to_string(),
            }),
        }
    }

    /// Accept a well-formed reply
    #[instrument(name = "clock_sync_reply", skip(self), fields(attempt = self.attempts))]
    pub fn on_reply(&mut self, t_node: NodeTime, t_recv: HostTime) -> Result<SyncEstimate, SyncError> {
        let t_send = self.last_sent.ok_or(SyncError::NotStarted)?;

        let offset = ClockOffset::from_exchange(t_node, t_send);
        let rtt_s = t_recv - t_send;
        let large_offset = offset.millis().abs() > self.config.warn_threshold_ms;

        metrics::histogram!("sync_host_clock_offset_ms").record(offset.millis());
        metrics::histogram!("sync_host_sync_rtt_ms").record(rtt_s * 1000.0);

        if large_offset {
            warn!(
                offset_ms = offset.millis(),
                threshold_ms = self.config.warn_threshold_ms,
                "Clock offset exceeds threshold, check Node time source"
            );
        }
        info!(
            offset_ms = offset.millis(),
            rtt_ms = rtt_s * 1000.0,
            "Clock offset estimated"
        );

        let estimate = SyncEstimate {
            offset,
            rtt_s,
            attempts: self.attempts,
            large_offset,
        };
        self.estimate = Some(estimate);
        Ok(estimate)
    }

    /// A reply arrived but could not be parsed
    ///
    /// Returns `Ok(())` when another attempt is allowed.
    pub fn on_malformed(&mut self, frame: &str) -> Result<(), SyncError> {
        metrics::counter!("sync_host_sync_malformed_total").increment(1);
        warn!(frame = %frame.trim(), attempt = self.attempts, "Malformed sync reply");
        if self.attempts >= self.config.max_attempts {
            return Err(SyncError::AttemptsExhausted {
                attempts: self.attempts,
            });
        }
        Ok(())
    }

    /// Time left before the overall deadline
    pub fn remaining(&self, now: HostTime) -> Duration {
        let Some(first) = self.first_sent else {
            return self.config.timeout;
        };
        let left = self.config.timeout.as_secs_f64() - (now - first);
        Duration::from_secs_f64(left.max(0.0))
    }

    pub fn deadline_passed(&self, now: HostTime) -> bool {
        self.first_sent.is_some() && self.remaining(now).is_zero()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    pub fn estimate(&self) -> Option<&SyncEstimate> {
        self.estimate.as_ref()
    }

    pub fn offset(&self) -> Option<ClockOffset> {
        self.estimate.map(|e| e.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator() -> ClockSyncEstimator {
        ClockSyncEstimator::new(ClockSyncConfig::default())
    }

    #[test]
    fn test_offset_and_rtt() {
        let mut sync = estimator();
        sync.begin_attempt(HostTime(1000.0)).unwrap();
        let est = sync.on_reply(NodeTime(1000.05), HostTime(1000.02)).unwrap();

        assert!((est.offset.secs() - 0.05).abs() < 1e-9);
        assert!((est.rtt_s - 0.02).abs() < 1e-9);
        assert!(!est.large_offset);
        assert_eq!(sync.offset(), Some(est.offset));
    }

    #[test]
    fn test_large_offset_flagged_not_rejected() {
        let mut sync = estimator();
        sync.begin_attempt(HostTime(50.0)).unwrap();
        let est = sync.on_reply(NodeTime(50.25), HostTime(50.01)).unwrap();
        assert!(est.large_offset);
        assert!((est.offset.millis() - 250.0).abs() < 1e-6);
    }

    #[test]
    fn test_reply_before_send() {
        let mut sync = estimator();
        assert!(matches!(
            sync.on_reply(NodeTime(1.0), HostTime(1.0)),
            Err(SyncError::NotStarted)
        ));
    }

    #[test]
    fn test_attempts_exhausted() {
        let mut sync = estimator();
        for attempt in 1..=3 {
            assert_eq!(sync.begin_attempt(HostTime(attempt as f64)).unwrap(), attempt);
            let result = sync.on_malformed("sync_ts:oops");
            assert_eq!(result.is_ok(), attempt < 3);
        }
        assert!(sync.begin_attempt(HostTime(4.0)).is_err());
    }

    #[test]
    fn test_offset_uses_latest_send() {
        let mut sync = estimator();
        sync.begin_attempt(HostTime(10.0)).unwrap();
        sync.on_malformed("sync_ts:").unwrap();
        sync.begin_attempt(HostTime(11.0)).unwrap();
        let est = sync.on_reply(NodeTime(11.5), HostTime(11.1)).unwrap();
        assert!((est.offset.secs() - 0.5).abs() < 1e-9);
        assert_eq!(est.attempts, 2);
    }

    #[test]
    fn test_deadline_from_first_send() {
        let mut sync = estimator();
        assert!(!sync.deadline_passed(HostTime(100.0)));
        sync.begin_attempt(HostTime(100.0)).unwrap();
        sync.begin_attempt(HostTime(105.0)).unwrap();
        assert!(!sync.deadline_passed(HostTime(109.9)));
        assert!(sync.deadline_passed(HostTime(110.0)));
        assert_eq!(sync.remaining(HostTime(112.0)), Duration::ZERO);
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(
            ClockSyncEstimator::parse_reply("sync_ts:12.5\n").unwrap(),
            NodeTime(12.5)
        );
        assert!(ClockSyncEstimator::parse_reply("sync_ts:abc").is_err());
        assert!(ClockSyncEstimator::parse_reply("ready").is_err());
    }
}
