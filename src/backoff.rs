//! Backoff policy for quota-aware retries.
//!
//! Two sources of wait time:
//! - **Server hint**: a quota-exhausted outcome carrying a positive `refillIn` waits
//!   `refillIn + grace`. The exponential counter is left untouched.
//! - **Exponential**: otherwise `next = min(2 * previous + step, max)`, starting from
//!   `previous = 0`. With the defaults this yields 100ms, 300ms, 700ms, 1500ms, 3100ms, ...
//!   capped at 60s.
//!
//! The policy is pure; the exponential counter lives in the caller's `RetryState`.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use quota_dispatch::BackoffPolicy;
//!
//! let policy = BackoffPolicy::default();
//! let mut previous = Duration::ZERO;
//! let mut waits = Vec::new();
//! for _ in 0..4 {
//!     previous = policy.exponential(previous);
//!     waits.push(previous.as_millis());
//! }
//! assert_eq!(waits, vec![100, 300, 700, 1500]);
//! ```

use crate::outcome::Outcome;
use std::fmt;
use std::time::Duration;

/// Increment added on every exponential step.
pub const DEFAULT_STEP: Duration = Duration::from_millis(100);
/// Added on top of the server's `refillIn` hint.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(100);
/// Cap for exponential waits.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    StepMustBePositive,
    MaxLessThanStep { step: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::StepMustBePositive => write!(f, "step must be greater than zero"),
            BackoffError::MaxLessThanStep { step, max } => {
                write!(f, "max ({:?}) must be >= step ({:?})", max, step)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

/// Where a wait duration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitSource {
    /// Server-provided `refillIn` plus grace.
    ServerHint,
    /// Local exponential estimate.
    Exponential,
}

/// A computed wait before the next attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    pub delay: Duration,
    pub source: WaitSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    step: Duration,
    grace: Duration,
    max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self { step: DEFAULT_STEP, grace: DEFAULT_GRACE, max: DEFAULT_MAX_BACKOFF }
    }
}

impl BackoffPolicy {
    /// Returns an error if `step` is zero or `max < step`.
    pub fn new(step: Duration, grace: Duration, max: Duration) -> Result<Self, BackoffError> {
        if step.is_zero() {
            return Err(BackoffError::StepMustBePositive);
        }
        if max < step {
            return Err(BackoffError::MaxLessThanStep { step, max });
        }
        Ok(Self { step, grace, max })
    }

    pub fn step(&self) -> Duration {
        self.step
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Next exponential wait given the previous one. Saturates instead of overflowing.
    pub fn exponential(&self, previous: Duration) -> Duration {
        previous.saturating_mul(2).saturating_add(self.step).min(self.max)
    }

    /// Wait before retrying after `outcome`, given the current exponential counter.
    ///
    /// Only meaningful for retryable outcomes; callers decide retryability first.
    pub fn next_wait(&self, previous: Duration, outcome: &Outcome) -> Wait {
        match outcome {
            Outcome::QuotaExhausted { wait_hint: Some(hint), .. } if !hint.is_zero() => {
                Wait { delay: hint.saturating_add(self.grace), source: WaitSource::ServerHint }
            }
            _ => Wait { delay: self.exponential(previous), source: WaitSource::Exponential },
        }
    }
}
