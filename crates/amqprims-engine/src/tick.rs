//! Idle-timeout bookkeeping.
//!
//! The engine keeps no clock. Callers either pass the time to
//! [`Engine::tick`](crate::Engine::tick) themselves or hand the engine a
//! [`TickDriver`] once through [`Engine::tick_auto`](crate::Engine::tick_auto).
//! The two styles are exclusive for the life of the engine.
//!
//! Activity is tracked with counters rather than timestamps: each ingest
//! bumps the input count and each output buffer the output count, and a
//! deadline restarts whenever its counter moved since the last tick.

use std::fmt;

/// Clock and scheduler supplied by the application for automatic ticking.
pub trait TickDriver {
    /// Current time in milliseconds on any monotonic scale.
    fn now_millis(&self) -> u64;

    /// Arrange for [`Engine::auto_tick`](crate::Engine::auto_tick) to run at
    /// or after `deadline`. A later call replaces an earlier one.
    fn schedule(&mut self, deadline: u64);
}

pub(crate) enum TickMode {
    Unset,
    Manual,
    Auto(Box<dyn TickDriver>),
}

impl fmt::Debug for TickMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickMode::Unset => f.write_str("Unset"),
            TickMode::Manual => f.write_str("Manual"),
            TickMode::Auto(_) => f.write_str("Auto"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct Ticker {
    pub(crate) mode: TickMode,
    input_seq: u64,
    output_seq: u64,
    seen_input: u64,
    seen_output: u64,
    local_deadline: Option<u64>,
    remote_deadline: Option<u64>,
    pub(crate) scheduled: Option<u64>,
}

impl Default for Ticker {
    fn default() -> Self {
        Self {
            mode: TickMode::Unset,
            input_seq: 0,
            output_seq: 0,
            seen_input: 0,
            seen_output: 0,
            local_deadline: None,
            remote_deadline: None,
            scheduled: None,
        }
    }
}

impl Ticker {
    pub(crate) fn on_input(&mut self) {
        self.input_seq = self.input_seq.wrapping_add(1);
    }

    pub(crate) fn on_output(&mut self) {
        self.output_seq = self.output_seq.wrapping_add(1);
    }

    /// Advance the local idle deadline; true once it has expired.
    /// `timeout` is `None` while local idle checking is off.
    pub(crate) fn local_expired(&mut self, now: u64, timeout: Option<u64>) -> bool {
        let Some(timeout) = timeout else {
            self.local_deadline = None;
            return false;
        };
        match self.local_deadline {
            Some(deadline) if self.input_seq == self.seen_input => now >= deadline,
            _ => {
                self.seen_input = self.input_seq;
                self.local_deadline = Some(now.saturating_add(timeout));
                false
            }
        }
    }

    /// Advance the heartbeat deadline; true when a heartbeat is due.
    /// `interval` is `None` when the peer wants no heartbeats.
    pub(crate) fn heartbeat_due(&mut self, now: u64, interval: Option<u64>) -> bool {
        let Some(interval) = interval else {
            self.remote_deadline = None;
            return false;
        };
        match self.remote_deadline {
            Some(deadline) if self.output_seq == self.seen_output && now >= deadline => {
                self.remote_deadline = Some(now.saturating_add(interval));
                // the heartbeat itself is the next output
                self.seen_output = self.output_seq.wrapping_add(1);
                true
            }
            Some(_) if self.output_seq == self.seen_output => false,
            _ => {
                self.seen_output = self.output_seq;
                self.remote_deadline = Some(now.saturating_add(interval));
                false
            }
        }
    }

    /// Earliest pending deadline; 0 when there is none.
    pub(crate) fn deadline(&self) -> u64 {
        let next = match (self.local_deadline, self.remote_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match next {
            None => 0,
            Some(0) => 1,
            Some(deadline) => deadline,
        }
    }

    /// Deadline the next tick would compute at `now`, without moving any.
    pub(crate) fn projected_deadline(
        &self,
        now: u64,
        timeout: Option<u64>,
        interval: Option<u64>,
    ) -> u64 {
        let local = timeout.map(|timeout| match self.local_deadline {
            Some(deadline) if self.input_seq == self.seen_input => deadline,
            _ => now.saturating_add(timeout),
        });
        let remote = interval.map(|interval| match self.remote_deadline {
            Some(deadline) if self.output_seq == self.seen_output => deadline,
            _ => now.saturating_add(interval),
        });
        let next = match (local, remote) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        match next {
            None => 0,
            Some(0) => 1,
            Some(deadline) => deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_deadline_restarts_on_input() {
        let mut ticker = Ticker::default();
        assert!(!ticker.local_expired(0, Some(100)));
        assert_eq!(ticker.deadline(), 100);

        ticker.on_input();
        assert!(!ticker.local_expired(90, Some(100)));
        assert_eq!(ticker.deadline(), 190);

        assert!(!ticker.local_expired(189, Some(100)));
        assert!(ticker.local_expired(190, Some(100)));
    }

    #[test]
    fn test_heartbeat_due_without_output() {
        let mut ticker = Ticker::default();
        assert!(!ticker.heartbeat_due(0, Some(50)));
        assert!(!ticker.heartbeat_due(49, Some(50)));
        assert!(ticker.heartbeat_due(50, Some(50)));
        ticker.on_output();
        assert_eq!(ticker.deadline(), 100);
        assert!(ticker.heartbeat_due(100, Some(50)));
    }

    #[test]
    fn test_output_postpones_heartbeat() {
        let mut ticker = Ticker::default();
        ticker.heartbeat_due(0, Some(50));
        ticker.on_output();
        assert!(!ticker.heartbeat_due(60, Some(50)));
        assert_eq!(ticker.deadline(), 110);
    }

    #[test]
    fn test_no_deadline_when_disabled() {
        let mut ticker = Ticker::default();
        assert!(!ticker.local_expired(10, None));
        assert!(!ticker.heartbeat_due(10, None));
        assert_eq!(ticker.deadline(), 0);
        assert_eq!(ticker.projected_deadline(10, None, Some(5)), 15);
    }

    #[test]
    fn test_zero_deadline_reported_as_one() {
        let mut ticker = Ticker::default();
        ticker.local_expired(0, Some(0));
        assert_eq!(ticker.deadline(), 1);
    }
}
