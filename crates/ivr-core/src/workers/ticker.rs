use crate::driver::Driver;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Timer thread shared by every timeslot
///
/// Each pass fires all due expiries, then sleeps until the earliest pending
/// one, capped at `idle`. [`Timeslot::arm`](crate::Timeslot::arm) wakes it
/// early so a new, sooner deadline is never overslept.
pub struct Ticker {
    driver: Arc<Driver>,
    idle: Duration,
}

impl Ticker {
    pub fn new(driver: Arc<Driver>) -> Self {
        let idle = Duration::from_millis(driver.config().workers.ticker_idle_ms.max(1));
        Self { driver, idle }
    }

    pub fn with_idle(mut self, idle: Duration) -> Self {
        self.idle = idle;
        self
    }

    /// Run one pass and return how long to sleep before the next
    pub fn tick(&self) -> Duration {
        let fired = self.driver.expire_due(self.driver.now_ms());
        if fired > 0 {
            trace!("Ticker fired {} timers", fired);
        }
        match self.driver.next_expiry() {
            Some(at) => {
                let wait = at.saturating_sub(self.driver.now_ms());
                Duration::from_millis(wait).min(self.idle)
            }
            None => self.idle,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        debug!("Ticker started");
        loop {
            let sleep = self.tick();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.driver.clock().woken() => {}
                _ = tokio::time::sleep(sleep) => {}
            }
        }
        debug!("Ticker stopped");
    }
}
