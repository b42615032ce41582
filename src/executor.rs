//! Single-attempt execution.
//!
//! `AttemptExecutor::attempt` is total: transport errors, undecodable bodies, and unexpected
//! statuses all come back as a classified [`Outcome`]. It holds no state between calls.

use crate::envelope::{decode_body, Envelope};
use crate::error::TransportError;
use crate::outcome::{classify_status, Outcome, StatusClass, Success, TerminalFailure};
use crate::request::{Request, Timeouts};
use crate::transport::{RawResponse, Transport, TransportCall};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AttemptExecutor {
    transport: Arc<dyn Transport>,
    default_timeouts: Timeouts,
}

impl AttemptExecutor {
    pub fn new<T>(transport: T, default_timeouts: Timeouts) -> Self
    where
        T: Transport + 'static,
    {
        Self { transport: Arc::new(transport), default_timeouts }
    }

    pub fn from_shared(transport: Arc<dyn Transport>, default_timeouts: Timeouts) -> Self {
        Self { transport, default_timeouts }
    }

    /// Timeouts for `request`: its own override, else the executor defaults.
    pub fn timeouts_for(&self, request: &Request) -> Timeouts {
        request.timeout_override().unwrap_or(self.default_timeouts)
    }

    /// Serialize a request into a transport call.
    pub fn prepare(&self, request: &Request, timeouts: Timeouts) -> TransportCall {
        TransportCall {
            method: request.method(),
            path: request.path().to_string(),
            query: request.query_string(),
            body: request.post_body().map(str::to_string),
            timeouts,
        }
    }

    /// Run one attempt and classify it.
    pub async fn attempt(&self, request: &Request, timeouts: Timeouts) -> Outcome {
        let call = self.prepare(request, timeouts);
        let started = tokio::time::Instant::now();
        let raw = self.transport.send(call).await;
        let elapsed = started.elapsed();

        let outcome = classify(raw, elapsed);
        tracing::debug!(
            method = request.method().as_str(),
            path = request.path(),
            outcome = outcome.label(),
            status = ?outcome.status_code(),
            elapsed_ms = elapsed.as_millis() as u64,
            "attempt finished"
        );
        outcome
    }
}

/// Classify the result of one exchange.
pub fn classify(raw: Result<RawResponse, TransportError>, request_time: Duration) -> Outcome {
    let raw = match raw {
        Ok(raw) => raw,
        Err(err) => return Outcome::TransientFailure(err.into()),
    };

    match classify_status(raw.status) {
        StatusClass::Success => match decode_body(&raw.body) {
            Ok(envelope) => {
                Outcome::Success(Success { quota: envelope.quota(), envelope, request_time })
            }
            Err(err) => Outcome::TransientFailure(err.into()),
        },
        StatusClass::QuotaExhausted => {
            let envelope = decode_body(&raw.body).ok();
            Outcome::quota_exhausted(envelope.as_ref().and_then(Envelope::quota))
        }
        StatusClass::Terminal(kind) => {
            let envelope = decode_body(&raw.body).ok();
            Outcome::TerminalFailure(TerminalFailure {
                status: raw.status,
                kind,
                quota: envelope.as_ref().and_then(Envelope::quota),
                error: envelope.and_then(|e| e.error),
            })
        }
    }
}
