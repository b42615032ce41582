//! Retry coordination for one logical request.
//!
//! Semantics:
//! - Attempts for one request are strictly sequential.
//! - `Success` resolves; `TerminalFailure` rejects on first occurrence with the outcome
//!   unchanged; `QuotaExhausted` and `TransientFailure` wait and retry without an attempt limit.
//! - The coordinator holds a retry-group slot for its whole life and an attempt-group slot only
//!   while an attempt runs, so a waiting coordinator never occupies an attempt worker.
//! - Cancellation (caller, deadline, or shutdown) is observed while queued, while attempting,
//!   and while waiting. An attempt already on the wire is left to finish in the background; its
//!   result is discarded.
//!
//! Invariants:
//! - Exactly one result is produced per `run`.
//! - The exponential counter is never advanced by a server-hinted wait.

use crate::backoff::BackoffPolicy;
use crate::error::{CancelCause, DispatchError};
use crate::executor::AttemptExecutor;
use crate::outcome::{Outcome, Success, TransientCause};
use crate::request::Request;
use crate::sleeper::Sleeper;
use crate::state::{RetryPhase, RetryState};
use crate::worker::WorkerGroup;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shared by every coordinator of one dispatcher.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub(crate) executor: AttemptExecutor,
    pub(crate) backoff: BackoffPolicy,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) attempt_workers: WorkerGroup,
    pub(crate) retry_workers: WorkerGroup,
    pub(crate) shutdown: CancellationToken,
}

impl RetryContext {
    pub fn new(
        executor: AttemptExecutor,
        backoff: BackoffPolicy,
        sleeper: Arc<dyn Sleeper>,
        attempt_workers: WorkerGroup,
        retry_workers: WorkerGroup,
    ) -> Self {
        Self {
            executor,
            backoff,
            sleeper,
            attempt_workers,
            retry_workers,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Phase and attempt count published by a running coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub phase: RetryPhase,
    pub attempts: usize,
}

/// Drives one request through attempts and waits until a terminal outcome.
#[derive(Debug)]
pub struct RetryCoordinator {
    context: Arc<RetryContext>,
    request: Arc<Request>,
    cancel: CancellationToken,
    deadline: Option<(Instant, Duration)>,
    progress: watch::Sender<Progress>,
    state: RetryState,
}

impl RetryCoordinator {
    pub fn new(context: Arc<RetryContext>, request: Request) -> Self {
        let cancel = context.shutdown.child_token();
        let (progress, _) =
            watch::channel(Progress { phase: RetryPhase::Pending, attempts: 0 });
        Self {
            context,
            request: Arc::new(request),
            cancel,
            deadline: None,
            progress,
            state: RetryState::new(),
        }
    }

    /// Bound the whole sequence, measured from now.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some((Instant::now() + deadline, deadline));
        self
    }

    /// Token that cancels this request only.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Progress> {
        self.progress.subscribe()
    }

    /// Retry until success, a terminal failure, or cancellation.
    pub async fn run(mut self) -> Result<Success, DispatchError> {
        let retry_workers = self.context.retry_workers.clone();
        let _slot = match self.interruptible(retry_workers.acquire()).await {
            Ok(Ok(slot)) => slot,
            Ok(Err(err)) => return self.abandon(err),
            Err(cause) => return self.cancelled(cause),
        };

        loop {
            let outcome = match self.attempt().await {
                Ok(outcome) => outcome,
                Err(cause) => return self.cancelled(cause),
            };
            if !outcome.is_retryable() {
                self.state.record(outcome);
                return self.settle();
            }

            let quota = outcome.quota();
            self.state.record(outcome);
            let wait = self.state.plan_wait(&self.context.backoff);
            self.publish();
            tracing::warn!(
                path = self.request.path(),
                attempt = self.state.attempts(),
                outcome = self.state.last_outcome().map(Outcome::label).unwrap_or("none"),
                source = ?wait.source,
                delay_ms = wait.delay.as_millis() as u64,
                tokens_left = quota.map(|q| q.tokens_left),
                refill_in_ms = quota.map(|q| q.refill_in.as_millis() as u64),
                "retrying after wait"
            );

            let sleep = self.context.sleeper.sleep(wait.delay);
            if let Err(cause) = self.interruptible(sleep).await {
                return self.cancelled(cause);
            }
        }
    }

    /// One attempt, no retries: every non-success outcome rejects.
    pub async fn run_once(mut self) -> Result<Success, DispatchError> {
        match self.attempt().await {
            Ok(outcome) => {
                self.state.record(outcome);
                self.settle()
            }
            Err(cause) => self.cancelled(cause),
        }
    }

    async fn attempt(&mut self) -> Result<Outcome, CancelCause> {
        let attempt_workers = self.context.attempt_workers.clone();
        let slot = match self.interruptible(attempt_workers.acquire()).await? {
            Ok(slot) => slot,
            Err(err) => {
                return Ok(Outcome::TransientFailure(TransientCause::Aborted(err.to_string())))
            }
        };

        let attempt = self.state.begin_attempt();
        self.publish();
        tracing::debug!(path = self.request.path(), attempt, "attempt started");

        let executor = self.context.executor.clone();
        let request = self.request.clone();
        let timeouts = executor.timeouts_for(&request);
        // Runs on its own task so a cancelled coordinator can stop listening without tearing
        // down the exchange; the slot is held until the exchange ends.
        let task = tokio::spawn(async move {
            let _slot = slot;
            executor.attempt(&request, timeouts).await
        });

        match self.interruptible(task).await? {
            Ok(outcome) => Ok(outcome),
            Err(join) => Ok(Outcome::TransientFailure(TransientCause::Aborted(join.to_string()))),
        }
    }

    /// Await `fut` unless the request is cancelled or its deadline passes first.
    async fn interruptible<F: Future>(&self, fut: F) -> Result<F::Output, CancelCause> {
        let deadline = async {
            match self.deadline {
                Some((at, limit)) => {
                    tokio::time::sleep_until(at).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancel_cause()),
            limit = deadline => Err(CancelCause::Deadline(limit)),
            out = fut => Ok(out),
        }
    }

    fn cancel_cause(&self) -> CancelCause {
        if self.context.shutdown.is_cancelled() {
            CancelCause::Shutdown
        } else {
            CancelCause::Caller
        }
    }

    fn publish(&self) {
        self.progress.send_replace(Progress {
            phase: self.state.phase(),
            attempts: self.state.attempts(),
        });
    }

    fn settle(&mut self) -> Result<Success, DispatchError> {
        let resolved = self.state.last_outcome().is_some_and(Outcome::is_success);
        let outcome = if resolved { self.state.resolve() } else { self.state.reject() };
        self.publish();

        let outcome = outcome.ok_or_else(|| {
            DispatchError::Transient(TransientCause::Aborted("no outcome recorded".to_string()))
        })?;
        match outcome {
            Outcome::Success(success) => {
                tracing::info!(
                    path = self.request.path(),
                    attempts = self.state.attempts(),
                    tokens_left = success.quota.map(|q| q.tokens_left),
                    request_time_ms = success.request_time.as_millis() as u64,
                    "request resolved"
                );
                Ok(success)
            }
            other => {
                let rejection = other.into_rejection();
                tracing::info!(
                    path = self.request.path(),
                    attempts = self.state.attempts(),
                    status = ?rejection.status_code(),
                    error = %rejection,
                    "request rejected"
                );
                Err(rejection)
            }
        }
    }

    fn cancelled(&mut self, cause: CancelCause) -> Result<Success, DispatchError> {
        self.state.reject();
        self.publish();
        tracing::info!(
            path = self.request.path(),
            attempts = self.state.attempts(),
            %cause,
            "request cancelled"
        );
        Err(DispatchError::Cancelled(cause))
    }

    fn abandon(&mut self, err: DispatchError) -> Result<Success, DispatchError> {
        self.state.reject();
        self.publish();
        Err(err)
    }
}
