//! Backoff policy for message submission.
//!
//! Only `ServiceError::Rejected` is retried. The driver asks the policy for the
//! next wait after every rejected attempt; `None` means the elapsed budget is
//! spent and the failure must be surfaced.

use std::time::Duration;

use rand::Rng;

#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total elapsed budget across all attempts.
    pub max_elapsed: Duration,
    /// Wait after the first rejected attempt.
    pub initial_backoff: Duration,
    /// Cap for a single wait.
    pub max_backoff: Duration,
    /// Full jitter: pick the wait uniformly in `0..=delay`.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_elapsed: Duration::from_secs(120),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Policy with the given budget and the default schedule.
    pub fn with_budget(max_elapsed: Duration) -> Self {
        Self { max_elapsed, ..Default::default() }
    }

    /// Never retry.
    pub fn disabled() -> Self {
        Self { max_elapsed: Duration::ZERO, ..Default::default() }
    }

    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Exponential delay for the given attempt (1-indexed), capped, before jitter.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self.initial_backoff.saturating_mul(2u32.saturating_pow(exp));
        base.min(self.max_backoff)
    }

    /// Wait before the next attempt, or `None` once `elapsed` has used up the budget.
    /// The wait never runs past the end of the budget.
    pub fn next_delay(&self, attempt: u32, elapsed: Duration) -> Option<Duration> {
        if elapsed >= self.max_elapsed {
            return None;
        }
        let mut delay = self.backoff_delay(attempt);
        if self.jitter && !delay.is_zero() {
            let secs = rand::thread_rng().gen_range(0.0..=delay.as_secs_f64());
            delay = Duration::from_secs_f64(secs);
        }
        Some(delay.min(self.max_elapsed - elapsed))
    }
}
