//! Error types for attempts, dispatch, and configuration
use crate::backoff::BackoffError;
use crate::envelope::QuotaSnapshot;
use crate::outcome::{TerminalFailure, TransientCause};
use std::fmt;
use std::time::Duration;

/// Local I/O failure before any status code was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TransportError {
    /// Connection refused, DNS failure, TLS handshake failure.
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("timed out: {0}")]
    Timeout(String),
    /// Reset or truncated exchange.
    #[error("i/o error: {0}")]
    Io(String),
}

/// The body arrived but could not be turned into an envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("empty body")]
    Empty,
    #[error("gzip: {0}")]
    Gzip(String),
    #[error("json: {0}")]
    Json(String),
}

/// Who or what cancelled a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// `DispatchHandle::cancel` was called.
    Caller,
    /// The deadline given at submission elapsed.
    Deadline(Duration),
    /// `Dispatcher::shutdown(true)`.
    Shutdown,
}

impl fmt::Display for CancelCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelCause::Caller => write!(f, "cancelled by caller"),
            CancelCause::Deadline(d) => write!(f, "deadline of {:?} elapsed", d),
            CancelCause::Shutdown => write!(f, "dispatcher shut down"),
        }
    }
}

/// Rejection observed by the caller of a dispatched request.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// The server answered with a non-retryable status.
    #[error("request rejected: {0}")]
    Terminal(TerminalFailure),
    /// Token bucket empty; only surfaced by single-shot dispatch.
    #[error("quota exhausted (server wait hint {wait_hint:?})")]
    QuotaExhausted { quota: Option<QuotaSnapshot>, wait_hint: Option<Duration> },
    /// Local failure; only surfaced by single-shot dispatch.
    #[error("{0}")]
    Transient(TransientCause),
    #[error("request cancelled: {0}")]
    Cancelled(CancelCause),
    /// Submitted after shutdown.
    #[error("dispatcher is closed")]
    Closed,
}

impl DispatchError {
    /// Check if the server rejected the request outright.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminal(_))
    }
    /// Check if the request was cancelled (caller, deadline, or shutdown).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
    /// Check if the failure might go away on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QuotaExhausted { .. } | Self::Transient(_))
    }
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        match self {
            Self::Cancelled(cause) => Some(*cause),
            _ => None,
        }
    }
    /// Borrow the terminal failure if present.
    pub fn as_terminal(&self) -> Option<&TerminalFailure> {
        match self {
            Self::Terminal(t) => Some(t),
            _ => None,
        }
    }
    /// HTTP status behind the rejection, when one was received.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Terminal(t) => Some(t.status),
            Self::QuotaExhausted { .. } => Some(crate::outcome::STATUS_TOO_MANY_REQUESTS),
            _ => None,
        }
    }
    /// Quota snapshot carried by the rejected response.
    pub fn quota(&self) -> Option<QuotaSnapshot> {
        match self {
            Self::Terminal(t) => t.quota,
            Self::QuotaExhausted { quota, .. } => *quota,
            _ => None,
        }
    }
}

/// Invalid dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{0} must be > 0")]
    ZeroWorkers(&'static str),
    #[error("{0} timeout must be non-zero")]
    ZeroTimeout(&'static str),
    #[error("backoff: {0}")]
    Backoff(#[from] BackoffError),
}
