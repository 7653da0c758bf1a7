//! Slot timers
//!
//! Each timeslot keeps its expiry as milliseconds since the driver's epoch
//! in an atomic, so the ticker can scan every slot without taking slot
//! locks. Arming a timer wakes the ticker early.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

const DISARMED: u64 = u64::MAX;

/// Shared time base and ticker wake-up
#[derive(Debug)]
pub struct Clock {
    epoch: Instant,
    wake: Notify,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            wake: Notify::new(),
        }
    }

    /// Milliseconds since the epoch
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn deadline(&self, after: Duration) -> u64 {
        self.now_ms().saturating_add(after.as_millis() as u64)
    }

    /// Instant corresponding to an epoch offset
    pub fn instant(&self, ms: u64) -> Instant {
        self.epoch + Duration::from_millis(ms)
    }

    /// Wake the ticker so it recomputes its sleep
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    pub async fn woken(&self) {
        self.wake.notified().await
    }
}

/// One slot's pending expiry
#[derive(Debug)]
pub struct Expiry(AtomicU64);

impl Default for Expiry {
    fn default() -> Self {
        Self(AtomicU64::new(DISARMED))
    }
}

impl Expiry {
    pub fn set(&self, at_ms: u64) {
        self.0.store(at_ms, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(DISARMED, Ordering::SeqCst);
    }

    pub fn get(&self) -> Option<u64> {
        match self.0.load(Ordering::SeqCst) {
            DISARMED => None,
            at => Some(at),
        }
    }

    /// Disarm and return `true` if the expiry is at or before `now_ms`.
    /// Only one caller wins a given expiry.
    pub fn take_due(&self, now_ms: u64) -> bool {
        let mut current = self.0.load(Ordering::SeqCst);
        while current <= now_ms {
            match self
                .0
                .compare_exchange(current, DISARMED, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_taken_once() {
        let expiry = Expiry::default();
        assert_eq!(expiry.get(), None);
        assert!(!expiry.take_due(u64::MAX - 1));

        expiry.set(100);
        assert!(!expiry.take_due(99));
        assert!(expiry.take_due(100));
        assert!(!expiry.take_due(200));
        assert_eq!(expiry.get(), None);
    }

    #[test]
    fn test_deadline_is_relative_to_epoch() {
        let clock = Clock::new();
        let deadline = clock.deadline(Duration::from_secs(5));
        assert!(deadline >= 5000);
        assert!(clock.instant(deadline) > Instant::now());
    }
}
