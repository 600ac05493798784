//! Monotonic deadlines for polling loops
//!
//! A [`Timeout`] is a start instant plus a duration. The driver's receive loop polls
//! [`Timeout::is_expired`] between IRQ reads, so the same loop serves both bounded
//! waits and "wait forever" (a zero duration is inert and never expires on its own).
//!
//! Force-expiry is the only cancellation path for a blocked receive. It is shared
//! through an atomic flag so an [`Expirer`] handed to another thread can stop a
//! `recv` that is polling on the owning thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deadline tracker backed by [`Instant`].
///
/// Clones share the forced-expiry flag.
#[derive(Debug, Clone, Default)]
pub struct Timeout {
    start: Option<Instant>,
    duration: Duration,
    expired: Arc<AtomicBool>,
}

impl Timeout {
    /// Creates a timeout and starts it with `ms` milliseconds.
    ///
    /// `Timeout::new(0)` is inert: it never expires unless [`expire`](Self::expire)
    /// is called.
    pub fn new(ms: u64) -> Self {
        let mut timeout = Self::default();
        timeout.start(ms);
        timeout
    }

    /// Captures the current instant and stores `ms` as the duration.
    ///
    /// Starting also clears a previous forced expiry.
    pub fn start(&mut self, ms: u64) {
        self.duration = Duration::from_millis(ms);
        self.start = (ms != 0).then(Instant::now);
        self.expired.store(false, Ordering::Release);
    }

    /// Re-captures the current instant, keeping the stored duration.
    ///
    /// A forced expiry survives a restart; only [`start`](Self::start) clears it.
    pub fn restart(&mut self) {
        if !self.duration.is_zero() {
            self.start = Some(Instant::now());
        }
    }

    /// Returns true once the duration has elapsed or the timeout was force-expired.
    pub fn is_expired(&self) -> bool {
        if self.expired.load(Ordering::Acquire) {
            return true;
        }

        match self.start {
            Some(start) if !self.duration.is_zero() => start.elapsed() >= self.duration,
            _ => false,
        }
    }

    /// Forces the next [`is_expired`](Self::is_expired) to return true.
    pub fn expire(&self) {
        self.expired.store(true, Ordering::Release);
    }

    /// Returns a handle able to force-expire this timeout from elsewhere.
    pub fn expirer(&self) -> Expirer {
        Expirer {
            expired: Arc::clone(&self.expired),
        }
    }

    /// Stored duration in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Time left before expiry, `None` for an inert timeout.
    pub fn remaining(&self) -> Option<Duration> {
        if self.expired.load(Ordering::Acquire) {
            return Some(Duration::ZERO);
        }
        self.start.map(|start| self.duration.saturating_sub(start.elapsed()))
    }
}

/// Cloneable, `Send` handle that force-expires a [`Timeout`].
#[derive(Debug, Clone)]
pub struct Expirer {
    expired: Arc<AtomicBool>,
}

impl Expirer {
    /// Same as [`Timeout::expire`].
    pub fn expire(&self) {
        self.expired.store(true, Ordering::Release);
    }
}

/// Blocking [`DelayNs`](embedded_hal::delay::DelayNs) on top of [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl embedded_hal::delay::DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(ns.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn not_expired_before_duration() {
        let timeout = Timeout::new(200);
        assert!(!timeout.is_expired());
        assert!(timeout.remaining().is_some_and(|left| left <= Duration::from_millis(200)));
    }

    #[test]
    fn expires_after_duration() {
        let timeout = Timeout::new(20);
        thread::sleep(Duration::from_millis(25));
        assert!(timeout.is_expired());
        assert_eq!(timeout.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn zero_duration_is_inert() {
        let timeout = Timeout::new(0);
        thread::sleep(Duration::from_millis(5));
        assert!(!timeout.is_expired());
        assert_eq!(timeout.remaining(), None);

        let never_started = Timeout::default();
        assert!(!never_started.is_expired());
    }

    #[test]
    fn expire_forces_expiry_regardless_of_duration() {
        let long = Timeout::new(60_000);
        long.expire();
        assert!(long.is_expired());

        let inert = Timeout::default();
        inert.expire();
        assert!(inert.is_expired());
    }

    #[test]
    fn restart_keeps_duration() {
        let mut timeout = Timeout::new(30);
        thread::sleep(Duration::from_millis(35));
        assert!(timeout.is_expired());

        timeout.restart();
        assert!(!timeout.is_expired());
        assert_eq!(timeout.duration_ms(), 30);
    }

    #[test]
    fn restart_does_not_clear_forced_expiry() {
        let mut timeout = Timeout::new(10_000);
        timeout.expire();
        timeout.restart();
        assert!(timeout.is_expired());

        timeout.start(10_000);
        assert!(!timeout.is_expired());
    }

    #[test]
    fn expirer_works_across_threads() {
        let timeout = Timeout::new(60_000);
        let expirer = timeout.expirer();

        thread::spawn(move || expirer.expire())
            .join()
            .expect("expirer thread panicked");

        assert!(timeout.is_expired());
    }
}
