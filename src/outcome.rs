//! Classified attempt outcomes.
//!
//! The classification table is closed: 200 succeeds, 429 is quota exhaustion, and every other
//! status is terminal. Only quota exhaustion and local transient failures are retried.

use crate::envelope::{ApiError, Envelope, QuotaSnapshot};
use crate::error::{DecodeError, DispatchError, TransportError};
use serde::de::DeserializeOwned;
use std::fmt;
use std::time::Duration;

/// Status code signalling an exhausted token bucket.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Reason attached to a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum FailureKind {
    /// 400: malformed or invalid request parameters.
    RequestRejected,
    /// 402: account has no access.
    PaymentRequired,
    /// 404
    NotFound,
    /// 405
    MethodNotAllowed,
    /// 500
    InternalServerError,
    /// Any unrecognized status.
    Fail,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::RequestRejected => "REQUEST_REJECTED",
            FailureKind::PaymentRequired => "PAYMENT_REQUIRED",
            FailureKind::NotFound => "NOT_FOUND",
            FailureKind::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            FailureKind::InternalServerError => "INTERNAL_SERVER_ERROR",
            FailureKind::Fail => "FAIL",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse class of an HTTP status before the body is consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    QuotaExhausted,
    Terminal(FailureKind),
}

/// Map a status code onto the fixed classification table.
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200 => StatusClass::Success,
        STATUS_TOO_MANY_REQUESTS => StatusClass::QuotaExhausted,
        400 => StatusClass::Terminal(FailureKind::RequestRejected),
        402 => StatusClass::Terminal(FailureKind::PaymentRequired),
        404 => StatusClass::Terminal(FailureKind::NotFound),
        405 => StatusClass::Terminal(FailureKind::MethodNotAllowed),
        500 => StatusClass::Terminal(FailureKind::InternalServerError),
        _ => StatusClass::Terminal(FailureKind::Fail),
    }
}

/// A decoded 200 response.
#[derive(Debug, Clone, PartialEq)]
pub struct Success {
    pub envelope: Envelope,
    pub quota: Option<QuotaSnapshot>,
    /// Local time spent on the attempt, connection setup included.
    pub request_time: Duration,
}

impl Success {
    /// Decode the response payload into a caller type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        self.envelope.payload_as()
    }
}

/// A non-retryable server response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalFailure {
    pub status: u16,
    pub kind: FailureKind,
    pub quota: Option<QuotaSnapshot>,
    pub error: Option<ApiError>,
}

impl fmt::Display for TerminalFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {})", self.kind, self.status)?;
        if let Some(error) = &self.error {
            write!(f, ": {}", error)?;
        }
        Ok(())
    }
}

/// Why an attempt failed before a usable response existed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TransientCause {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("undecodable response: {0}")]
    Decode(#[from] DecodeError),
    /// The attempt task ended without producing an outcome.
    #[error("attempt aborted: {0}")]
    Aborted(String),
}

/// Result of one physical attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Success),
    QuotaExhausted { quota: Option<QuotaSnapshot>, wait_hint: Option<Duration> },
    TransientFailure(TransientCause),
    TerminalFailure(TerminalFailure),
}

impl Outcome {
    /// Quota exhaustion, with the server's positive `refillIn` as the wait hint.
    pub fn quota_exhausted(quota: Option<QuotaSnapshot>) -> Self {
        let wait_hint = quota.map(|q| q.refill_in).filter(|d| !d.is_zero());
        Outcome::QuotaExhausted { quota, wait_hint }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Outcome::QuotaExhausted { .. } | Outcome::TransientFailure(_))
    }

    pub fn quota(&self) -> Option<QuotaSnapshot> {
        match self {
            Outcome::Success(s) => s.quota,
            Outcome::QuotaExhausted { quota, .. } => *quota,
            Outcome::TerminalFailure(t) => t.quota,
            Outcome::TransientFailure(_) => None,
        }
    }

    /// Status code received from the server, if the attempt got that far.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Outcome::Success(_) => Some(200),
            Outcome::QuotaExhausted { .. } => Some(STATUS_TOO_MANY_REQUESTS),
            Outcome::TerminalFailure(t) => Some(t.status),
            Outcome::TransientFailure(_) => None,
        }
    }

    /// Rejection surfaced for a non-success outcome.
    pub fn into_rejection(self) -> DispatchError {
        match self {
            Outcome::TerminalFailure(failure) => DispatchError::Terminal(failure),
            Outcome::QuotaExhausted { quota, wait_hint } => {
                DispatchError::QuotaExhausted { quota, wait_hint }
            }
            Outcome::TransientFailure(cause) => DispatchError::Transient(cause),
            Outcome::Success(_) => DispatchError::Transient(TransientCause::Aborted(
                "success treated as rejection".to_string(),
            )),
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::QuotaExhausted { .. } => "quota_exhausted",
            Outcome::TransientFailure(_) => "transient_failure",
            Outcome::TerminalFailure(_) => "terminal_failure",
        }
    }
}
