//! Per-request retry state machine.
//!
//! ```text
//! PENDING -> ATTEMPTING -> RESOLVED
//!                       -> REJECTED
//!                       -> WAITING -> ATTEMPTING
//!                                  -> REJECTED (cancelled)
//! PENDING -> REJECTED (cancelled before the first attempt)
//! ```
//!
//! A `RetryState` is owned by exactly one coordinator for the lifetime of one logical request
//! and is dropped once a terminal phase is reached.

use crate::backoff::{BackoffPolicy, Wait, WaitSource};
use crate::outcome::Outcome;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryPhase {
    Pending,
    Attempting,
    Waiting,
    Resolved,
    Rejected,
}

impl RetryPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RetryPhase::Resolved | RetryPhase::Rejected)
    }

    pub fn can_transition_to(&self, next: RetryPhase) -> bool {
        use RetryPhase::*;
        matches!(
            (self, next),
            (Pending, Attempting)
                | (Pending, Rejected)
                | (Attempting, Resolved)
                | (Attempting, Rejected)
                | (Attempting, Waiting)
                | (Waiting, Attempting)
                | (Waiting, Rejected)
        )
    }
}

impl fmt::Display for RetryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetryPhase::Pending => "PENDING",
            RetryPhase::Attempting => "ATTEMPTING",
            RetryPhase::Waiting => "WAITING",
            RetryPhase::Resolved => "RESOLVED",
            RetryPhase::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

/// Attempt count, exponential counter, and last outcome of one logical request.
#[derive(Debug)]
pub struct RetryState {
    phase: RetryPhase,
    attempts: usize,
    backoff: Duration,
    last_outcome: Option<Outcome>,
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            phase: RetryPhase::Pending,
            attempts: 0,
            backoff: Duration::ZERO,
            last_outcome: None,
        }
    }

    pub fn phase(&self) -> RetryPhase {
        self.phase
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Current exponential counter (the last exponential wait, zero initially).
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn last_outcome(&self) -> Option<&Outcome> {
        self.last_outcome.as_ref()
    }

    fn enter(&mut self, next: RetryPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal retry transition {} -> {}",
            self.phase,
            next
        );
        self.phase = next;
    }

    /// Enter `ATTEMPTING`; returns the 1-based attempt number.
    pub fn begin_attempt(&mut self) -> usize {
        self.enter(RetryPhase::Attempting);
        self.attempts += 1;
        self.attempts
    }

    /// Store the outcome of the attempt in progress.
    pub fn record(&mut self, outcome: Outcome) {
        self.last_outcome = Some(outcome);
    }

    /// Enter `WAITING` with the wait computed from the last outcome.
    ///
    /// Exponential waits advance the counter; server hints leave it untouched.
    pub fn plan_wait(&mut self, policy: &BackoffPolicy) -> Wait {
        let wait = match &self.last_outcome {
            Some(outcome) => policy.next_wait(self.backoff, outcome),
            None => {
                Wait { delay: policy.exponential(self.backoff), source: WaitSource::Exponential }
            }
        };
        if wait.source == WaitSource::Exponential {
            self.backoff = wait.delay;
        }
        self.enter(RetryPhase::Waiting);
        wait
    }

    /// Enter `RESOLVED` and reset the exponential counter.
    pub fn resolve(&mut self) -> Option<Outcome> {
        self.enter(RetryPhase::Resolved);
        self.backoff = Duration::ZERO;
        self.last_outcome.take()
    }

    /// Enter `REJECTED`.
    pub fn reject(&mut self) -> Option<Outcome> {
        self.enter(RetryPhase::Rejected);
        self.last_outcome.take()
    }
}
