//! Periodic and one-shot timing against a `HostClock`.

use std::time::Duration;

use contracts::HostTime;

/// Fixed-interval schedule
///
/// Fires on the first check, then once per interval. A late check fires once
/// and re-bases on the check time instead of bursting to catch up.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    interval_s: f64,
    next_due: Option<HostTime>,
}

impl Cadence {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_s: interval.as_secs_f64(),
            next_due: None,
        }
    }

    pub fn from_secs(interval_s: f64) -> Self {
        Self {
            interval_s,
            next_due: None,
        }
    }

    /// Whether the cadence fires at `now`; advances the schedule when it does
    pub fn due(&mut self, now: HostTime) -> bool {
        match self.next_due {
            Some(next) if now < next => false,
            Some(next) => {
                let scheduled = next.offset_by(self.interval_s);
                self.next_due = Some(if scheduled <= now {
                    now.offset_by(self.interval_s)
                } else {
                    scheduled
                });
                true
            }
            None => {
                self.next_due = Some(now.offset_by(self.interval_s));
                true
            }
        }
    }

    /// Time until the next firing (zero when already due)
    pub fn until_due(&self, now: HostTime) -> Duration {
        match self.next_due {
            Some(next) => Duration::from_secs_f64((next - now).max(0.0)),
            None => Duration::ZERO,
        }
    }

    pub fn interval_s(&self) -> f64 {
        self.interval_s
    }

    /// Forget the schedule; the next check fires immediately
    pub fn reset(&mut self) {
        self.next_due = None;
    }
}

/// One-shot deadline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deadline {
    at: HostTime,
}

impl Deadline {
    pub fn after(now: HostTime, duration: Duration) -> Self {
        Self {
            at: now.offset_by(duration.as_secs_f64()),
        }
    }

    pub fn at(&self) -> HostTime {
        self.at
    }

    pub fn expired(&self, now: HostTime) -> bool {
        now >= self.at
    }

    pub fn remaining(&self, now: HostTime) -> Duration {
        Duration::from_secs_f64((self.at - now).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_fires_once_per_interval() {
        let mut cadence = Cadence::from_secs(0.25);
        assert!(cadence.due(HostTime(10.0)));
        assert!(!cadence.due(HostTime(10.1)));
        assert!(!cadence.due(HostTime(10.249)));
        assert!(cadence.due(HostTime(10.25)));
        assert!(cadence.due(HostTime(10.5)));
    }

    #[test]
    fn test_cadence_late_check_does_not_burst() {
        let mut cadence = Cadence::from_secs(0.5);
        assert!(cadence.due(HostTime(0.0)));
        assert!(cadence.due(HostTime(3.2)));
        assert!(!cadence.due(HostTime(3.3)));
        assert!(cadence.due(HostTime(3.7)));
    }

    #[test]
    fn test_until_due() {
        let mut cadence = Cadence::from_secs(0.5);
        assert_eq!(cadence.until_due(HostTime(0.0)), Duration::ZERO);
        cadence.due(HostTime(0.0));
        let wait = cadence.until_due(HostTime(0.2));
        assert!((wait.as_secs_f64() - 0.3).abs() < 1e-9);
        cadence.reset();
        assert!(cadence.due(HostTime(0.3)));
    }

    #[test]
    fn test_deadline() {
        let deadline = Deadline::after(HostTime(100.0), Duration::from_secs(2));
        assert!(!deadline.expired(HostTime(101.9)));
        assert!(deadline.expired(HostTime(102.0)));
        assert_eq!(deadline.remaining(HostTime(103.0)), Duration::ZERO);
    }
}
