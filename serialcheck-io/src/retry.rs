//! Bounded retry for device discovery and reconnects.
//!
//! Lives above the probe and the parser, which never retry themselves.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed(Duration),
    Exponential { initial: Duration, max: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Backoff,
    /// Pause once after a successful attempt, before the caller uses the
    /// result. A freshly enumerated USB serial device needs a moment before
    /// it accepts an open.
    pub settle: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(1, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            backoff: Backoff::Fixed(delay),
            settle: Duration::ZERO,
        }
    }

    pub fn exponential(attempts: u32, initial: Duration, max: Duration) -> Self {
        Self {
            attempts,
            backoff: Backoff::Exponential { initial, max },
            settle: Duration::ZERO,
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Delay after the failed attempt number `attempt` (zero-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => initial
                .checked_mul(2u32.saturating_pow(attempt))
                .map_or(max, |d| d.min(max)),
        }
    }

    /// Run `op` until it yields `Some`, sleeping between attempts.
    pub fn find<T>(&self, op: impl FnMut(u32) -> Option<T>) -> Option<T> {
        self.find_with_sleep(op, std::thread::sleep)
    }

    pub fn find_with_sleep<T>(
        &self,
        mut op: impl FnMut(u32) -> Option<T>,
        sleep: impl FnMut(Duration),
    ) -> Option<T> {
        self.run_with_sleep(|attempt| op(attempt).ok_or(()), sleep).ok()
    }

    /// Run `op` until it succeeds; the last error is returned when every
    /// attempt fails.
    pub fn run<T, E>(&self, op: impl FnMut(u32) -> Result<T, E>) -> Result<T, E>
    where
        E: std::fmt::Debug,
    {
        self.run_with_sleep(op, std::thread::sleep)
    }

    pub fn run_with_sleep<T, E>(
        &self,
        mut op: impl FnMut(u32) -> Result<T, E>,
        mut sleep: impl FnMut(Duration),
    ) -> Result<T, E>
    where
        E: std::fmt::Debug,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;

        loop {
            tracing::info!("Attempt #{} of {}", attempt + 1, attempts);
            match op(attempt) {
                Ok(value) => {
                    if !self.settle.is_zero() {
                        tracing::debug!("Settling for {:?}", self.settle);
                        sleep(self.settle);
                    }
                    return Ok(value);
                }
                Err(e) if attempt + 1 >= attempts => {
                    tracing::warn!("Giving up after {} attempts: {:?}", attempts, e);
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!("Attempt #{} failed: {:?}", attempt + 1, e);
                    sleep(self.delay_for(attempt));
                    attempt += 1;
                }
            }
        }
    }
}
