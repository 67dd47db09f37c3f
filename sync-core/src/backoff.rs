//! Polling backoff for periodic re-resolution.
//!
//! With no failures the poller runs every `base_interval`. After failures it
//! retries sooner, on an exponential curve that plateaus at `base_interval`:
//!
//! ```text
//! delay(0) = base_interval
//! delay(n) = min(fail_base + fail_step * 2^min(n, max_fail_exponent), base_interval)
//! ```

use std::time::Duration;

/// Default interval between polls when nothing is failing.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Failure counter and delay curve for the polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingBackoff {
    base_interval: Duration,
    fail_base: Duration,
    fail_step: Duration,
    max_fail_exponent: u32,
    failures: u32,
}

impl PollingBackoff {
    /// Create a backoff with an explicit curve.
    pub fn new(
        base_interval: Duration,
        fail_base: Duration,
        fail_step: Duration,
        max_fail_exponent: u32,
    ) -> Self {
        Self {
            base_interval,
            fail_base,
            fail_step,
            max_fail_exponent,
            failures: 0,
        }
    }

    /// Record a failed poll.
    pub fn fail(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Clear the failure counter.
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Consecutive failures recorded since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay until the next poll.
    pub fn delay(&self) -> Duration {
        if self.failures == 0 {
            return self.base_interval;
        }
        let exponent = self.failures.min(self.max_fail_exponent).min(31);
        let growth = self.fail_step.saturating_mul(1u32 << exponent);
        self.fail_base
            .saturating_add(growth)
            .min(self.base_interval)
    }
}

impl Default for PollingBackoff {
    fn default() -> Self {
        Self::new(
            DEFAULT_POLL_INTERVAL,
            Duration::from_secs(1),
            Duration::from_secs(1),
            6,
        )
    }
}
