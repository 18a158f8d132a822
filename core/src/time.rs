//! # Wait Timing
//!
//! Timeout conversion and the backoff constants shared by every wait loop.
//!
//! Timeouts are expressed in system timestamp ticks. [`WAIT_FOREVER`]
//! never expires.

use std::time::{Duration, Instant};

use helix_stream_hal::INFINITE_MS;

/// Timeout that never expires
pub const WAIT_FOREVER: u64 = u64::MAX;

/// Tight-spin phase at the start of every wait
pub const SPIN_GRACE: Duration = Duration::from_micros(200);

/// Sleep step of polling waiters once the spin phase is over
pub const SLEEP_STEP: Duration = Duration::from_micros(20);

/// Longest finite OS event wait, in milliseconds
pub const MAX_EVENT_WAIT_MS: u32 = 0xFFFF_FFFE;

/// Converts timestamp ticks to wall-clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    frequency_hz: u64,
}

impl Clock {
    /// Nanosecond ticks
    pub const NANOSECONDS: Self = Self {
        frequency_hz: 1_000_000_000,
    };

    /// A clock ticking `frequency_hz` times per second
    pub fn new(frequency_hz: u64) -> Self {
        Self {
            frequency_hz: frequency_hz.max(1),
        }
    }

    /// Ticks per second
    pub fn frequency(&self) -> u64 {
        self.frequency_hz
    }

    /// Convert a timeout in ticks, `None` meaning forever
    pub fn timeout(&self, ticks: u64) -> Option<Duration> {
        if ticks == WAIT_FOREVER {
            return None;
        }
        let nanos = u128::from(ticks) * 1_000_000_000 / u128::from(self.frequency_hz);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }

    /// Convert a duration to ticks
    pub fn ticks(&self, duration: Duration) -> u64 {
        let ticks = duration.as_nanos() * u128::from(self.frequency_hz) / 1_000_000_000;
        u64::try_from(ticks).unwrap_or(WAIT_FOREVER - 1)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::NANOSECONDS
    }
}

/// Progress of one wait call
#[derive(Debug, Clone, Copy)]
pub(crate) struct WaitClock {
    start: Instant,
    limit: Option<Duration>,
}

impl WaitClock {
    pub(crate) fn start(clock: &Clock, timeout: u64) -> Self {
        Self {
            start: Instant::now(),
            limit: clock.timeout(timeout),
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub(crate) fn expired(&self) -> bool {
        self.limit.is_some_and(|limit| self.elapsed() >= limit)
    }

    pub(crate) fn in_grace(&self) -> bool {
        self.elapsed() < SPIN_GRACE
    }

    /// Remaining time as an OS event timeout
    pub(crate) fn remaining_ms(&self) -> u32 {
        match self.limit {
            None => INFINITE_MS,
            Some(limit) => {
                let remaining = limit.saturating_sub(self.elapsed());
                remaining.as_millis().min(u128::from(MAX_EVENT_WAIT_MS)) as u32
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_conversion() {
        let clock = Clock::new(1_000_000);
        assert_eq!(clock.timeout(WAIT_FOREVER), None);
        assert_eq!(clock.timeout(1_500), Some(Duration::from_micros(1_500)));
        assert_eq!(clock.ticks(Duration::from_millis(2)), 2_000);
        assert_eq!(Clock::default().timeout(5), Some(Duration::from_nanos(5)));
    }

    #[test]
    fn test_remaining_ms() {
        let forever = WaitClock::start(&Clock::default(), WAIT_FOREVER);
        assert_eq!(forever.remaining_ms(), INFINITE_MS);
        assert!(!forever.expired());

        let ms = Clock::default().ticks(Duration::from_secs(10));
        let bounded = WaitClock::start(&Clock::default(), ms);
        assert!(bounded.remaining_ms() <= 10_000);
        assert!(bounded.remaining_ms() > 9_000);

        let zero = WaitClock::start(&Clock::default(), 0);
        assert!(zero.expired());
        assert_eq!(zero.remaining_ms(), 0);
    }
}
