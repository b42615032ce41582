//! Dispatcher configuration.
//!
//! Supplied once at construction and never mutated afterwards.
//!
//! ```rust
//! use std::time::Duration;
//! use quota_dispatch::DispatcherConfig;
//!
//! let config = DispatcherConfig::builder()
//!     .attempt_workers(8)
//!     .read_timeout(Duration::from_secs(30))
//!     .max_backoff(Duration::from_secs(10))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.attempt_workers(), 8);
//! assert_eq!(config.retry_workers(), 4);
//! ```

use crate::backoff::{BackoffPolicy, DEFAULT_GRACE, DEFAULT_MAX_BACKOFF, DEFAULT_STEP};
use crate::error::ConfigError;
use crate::request::{Timeouts, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
use std::time::Duration;

/// Default size of each worker group.
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    attempt_workers: usize,
    retry_workers: usize,
    timeouts: Timeouts,
    backoff: BackoffPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            attempt_workers: DEFAULT_WORKERS,
            retry_workers: DEFAULT_WORKERS,
            timeouts: Timeouts::default(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn builder() -> DispatcherConfigBuilder {
        DispatcherConfigBuilder::new()
    }

    /// Maximum attempts on the wire at once.
    pub fn attempt_workers(&self) -> usize {
        self.attempt_workers
    }

    /// Maximum requests being coordinated (attempting or waiting) at once.
    pub fn retry_workers(&self) -> usize {
        self.retry_workers
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }
}

/// Builder for `DispatcherConfig`.
#[derive(Debug, Clone)]
pub struct DispatcherConfigBuilder {
    attempt_workers: usize,
    retry_workers: usize,
    connect_timeout: Duration,
    read_timeout: Duration,
    backoff_step: Duration,
    quota_grace: Duration,
    max_backoff: Duration,
}

impl Default for DispatcherConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatcherConfigBuilder {
    pub fn new() -> Self {
        Self {
            attempt_workers: DEFAULT_WORKERS,
            retry_workers: DEFAULT_WORKERS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            backoff_step: DEFAULT_STEP,
            quota_grace: DEFAULT_GRACE,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    /// Must be > 0.
    pub fn attempt_workers(mut self, workers: usize) -> Self {
        self.attempt_workers = workers;
        self
    }

    /// Must be > 0.
    pub fn retry_workers(mut self, workers: usize) -> Self {
        self.retry_workers = workers;
        self
    }

    /// Set both worker groups to the same size.
    pub fn workers(self, workers: usize) -> Self {
        self.attempt_workers(workers).retry_workers(workers)
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Increment of the exponential backoff recurrence.
    pub fn backoff_step(mut self, step: Duration) -> Self {
        self.backoff_step = step;
        self
    }

    /// Added to server-provided refill hints.
    pub fn quota_grace(mut self, grace: Duration) -> Self {
        self.quota_grace = grace;
        self
    }

    /// Cap for exponential waits; server hints are not capped.
    pub fn max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    pub fn build(self) -> Result<DispatcherConfig, ConfigError> {
        if self.attempt_workers == 0 {
            return Err(ConfigError::ZeroWorkers("attempt_workers"));
        }
        if self.retry_workers == 0 {
            return Err(ConfigError::ZeroWorkers("retry_workers"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("connect"));
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout("read"));
        }
        let backoff = BackoffPolicy::new(self.backoff_step, self.quota_grace, self.max_backoff)?;
        Ok(DispatcherConfig {
            attempt_workers: self.attempt_workers,
            retry_workers: self.retry_workers,
            timeouts: Timeouts::new(self.connect_timeout, self.read_timeout),
            backoff,
        })
    }
}
