//! Retry policies for connect loops.
use std::{fmt, sync::Arc, time::Duration};

use serde::Deserialize;

/// Decision returned by a [`RetryPolicy`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryDecision {
    /// Wait for the given duration, then try again.
    Delay(Duration),

    /// Stop retrying.
    GiveUp,
}

/// A retry policy.
///
/// Policies are pure functions of the attempt counter: the same input always produces the same decision, and no state
/// is carried between calls. The caller owns the counter, see [`RetryState`].
///
/// `attempt` is the number of consecutive failed attempts so far, so the first call after the first failure passes
/// `1`.
pub trait RetryPolicy: fmt::Debug + Send + Sync {
    /// Returns the decision for the given number of failed attempts.
    fn next_delay(&self, attempt: u32) -> RetryDecision;
}

/// Retries forever with a constant delay.
#[derive(Clone, Debug)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    /// Creates a new `FixedDelay` policy.
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RetryPolicy for FixedDelay {
    fn next_delay(&self, _attempt: u32) -> RetryDecision {
        RetryDecision::Delay(self.delay)
    }
}

/// Retries forever with an exponentially increasing delay.
///
/// The delay doubles with every failed attempt, starting at the minimum delay for the first failure, and is clamped
/// to the maximum delay.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    min_backoff: Duration,
    max_backoff: Duration,
}

impl ExponentialBackoff {
    /// Creates a new `ExponentialBackoff` with the given minimum and maximum delays.
    ///
    /// If `max_backoff` is smaller than `min_backoff`, it is raised to `min_backoff`.
    pub fn new(min_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            min_backoff,
            max_backoff: max_backoff.max(min_backoff),
        }
    }

    /// Calculates the delay for the given number of failed attempts.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let backoff = self.min_backoff.saturating_mul(2u32.saturating_pow(exponent));
        backoff.clamp(self.min_backoff, self.max_backoff)
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> RetryDecision {
        RetryDecision::Delay(self.backoff_duration(attempt))
    }
}

/// Wraps another policy, giving up once a maximum number of attempts has failed.
///
/// There is no delay after the final failed attempt, so `max_attempts` attempts wait through `max_attempts - 1` delays.
#[derive(Clone, Debug)]
pub struct Bounded<P> {
    inner: P,
    max_attempts: u32,
}

impl<P> Bounded<P> {
    /// Creates a new `Bounded` policy that gives up after `max_attempts` failed attempts.
    pub const fn new(inner: P, max_attempts: u32) -> Self {
        Self { inner, max_attempts }
    }
}

impl<P: RetryPolicy> RetryPolicy for Bounded<P> {
    fn next_delay(&self, attempt: u32) -> RetryDecision {
        if attempt >= self.max_attempts {
            RetryDecision::GiveUp
        } else {
            self.inner.next_delay(attempt)
        }
    }
}

/// Per-loop retry bookkeeping.
///
/// Owned by a single connect loop. The counter is only ever reset by a successful connect.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RetryState {
    /// Number of consecutive failed attempts.
    pub attempt: u32,

    /// Delay that was waited after the most recent failure.
    pub last_delay: Duration,
}

impl RetryState {
    /// Records a failed attempt and asks the policy what to do next.
    pub fn record_failure(&mut self, policy: &dyn RetryPolicy) -> RetryDecision {
        self.attempt = self.attempt.saturating_add(1);
        let decision = policy.next_delay(self.attempt);
        if let RetryDecision::Delay(delay) = decision {
            self.last_delay = delay;
        }
        decision
    }

    /// Resets the state after a successful connect.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

const fn default_fixed_delay_ms() -> u64 {
    1000
}

const fn default_min_delay_ms() -> u64 {
    1000
}

const fn default_max_delay_ms() -> u64 {
    30_000
}

/// Retry policy configuration.
///
/// Selected by the `type` field. Any variant can be bounded by setting `max_attempts`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum RetryPolicyConfiguration {
    /// Constant delay between attempts.
    Fixed {
        /// Delay between attempts, in milliseconds.
        #[serde(default = "default_fixed_delay_ms")]
        delay_ms: u64,

        /// Number of failed attempts after which to give up.
        #[serde(default)]
        max_attempts: Option<u32>,
    },

    /// Exponentially increasing delay between attempts.
    Exponential {
        /// Delay after the first failure, in milliseconds.
        #[serde(default = "default_min_delay_ms")]
        min_delay_ms: u64,

        /// Upper bound on the delay, in milliseconds.
        #[serde(default = "default_max_delay_ms")]
        max_delay_ms: u64,

        /// Number of failed attempts after which to give up.
        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

impl Default for RetryPolicyConfiguration {
    fn default() -> Self {
        Self::Exponential {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
        }
    }
}

impl RetryPolicyConfiguration {
    /// Builds the configured policy.
    pub fn build(&self) -> Arc<dyn RetryPolicy> {
        match *self {
            Self::Fixed { delay_ms, max_attempts } => {
                bounded_or_not(FixedDelay::new(Duration::from_millis(delay_ms)), max_attempts)
            }
            Self::Exponential {
                min_delay_ms,
                max_delay_ms,
                max_attempts,
            } => bounded_or_not(
                ExponentialBackoff::new(Duration::from_millis(min_delay_ms), Duration::from_millis(max_delay_ms)),
                max_attempts,
            ),
        }
    }
}

fn bounded_or_not<P: RetryPolicy + 'static>(policy: P, max_attempts: Option<u32>) -> Arc<dyn RetryPolicy> {
    match max_attempts {
        Some(max_attempts) => Arc::new(Bounded::new(policy, max_attempts)),
        None => Arc::new(policy),
    }
}
