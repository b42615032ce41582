//! Admission and scheduling of logical requests.
//!
//! `Dispatcher::submit` never blocks: it spawns a `RetryCoordinator` for the request and returns
//! a [`DispatchHandle`] that resolves to exactly one result. Concurrency is bounded by the two
//! worker groups inside the shared [`RetryContext`]; coordinators queue fairly for them.
//!
//! ```rust,no_run
//! use quota_dispatch::{Dispatcher, DispatcherConfig, HttpTransport, Request};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = HttpTransport::builder("my-access-key").build();
//! let dispatcher = Dispatcher::new(transport, DispatcherConfig::default());
//!
//! let request = Request::new("product").param("domain", "1").param("asin", "B00");
//! let handle = dispatcher.submit(request);
//! let success = handle.await?;
//! println!("tokens left: {:?}", success.quota.map(|q| q.tokens_left));
//!
//! dispatcher.shutdown(false);
//! dispatcher.closed().await;
//! # Ok(())
//! # }
//! ```

use crate::config::DispatcherConfig;
use crate::coordinator::{Progress, RetryContext, RetryCoordinator};
use crate::error::{CancelCause, DispatchError};
use crate::executor::AttemptExecutor;
use crate::outcome::Success;
use crate::request::Request;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::state::RetryPhase;
use crate::transport::Transport;
use crate::worker::WorkerGroup;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

#[derive(Debug, Clone, Copy)]
enum Mode {
    Retry,
    Once,
}

#[derive(Debug)]
struct Inner {
    context: Arc<RetryContext>,
    config: DispatcherConfig,
    accepting: AtomicBool,
    tracker: TaskTracker,
    next_id: AtomicU64,
}

/// Bounded-concurrency scheduler for logical requests.
///
/// Cloning is cheap; clones share workers, configuration, and shutdown state.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Dispatcher with real-time waits.
    pub fn new<T>(transport: T, config: DispatcherConfig) -> Self
    where
        T: Transport + 'static,
    {
        Self::builder(transport).config(config).build()
    }

    pub fn builder<T>(transport: T) -> DispatcherBuilder
    where
        T: Transport + 'static,
    {
        DispatcherBuilder {
            transport: Arc::new(transport),
            config: DispatcherConfig::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// Admit `request` and retry it until success, a terminal failure, or cancellation.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, request: Request) -> DispatchHandle {
        self.spawn(request, None, Mode::Retry)
    }

    /// Like [`submit`](Self::submit), rejecting with `Cancelled(Deadline)` once `deadline`
    /// elapses.
    pub fn submit_with_deadline(&self, request: Request, deadline: Duration) -> DispatchHandle {
        self.spawn(request, Some(deadline), Mode::Retry)
    }

    /// Run exactly one attempt; every non-success outcome rejects.
    pub fn submit_once(&self, request: Request) -> DispatchHandle {
        self.spawn(request, None, Mode::Once)
    }

    /// Stop admitting requests.
    ///
    /// With `cancel_pending`, queued and waiting coordinators reject with
    /// `Cancelled(Shutdown)` and attempts already on the wire have their results discarded.
    /// Otherwise admitted requests run to completion.
    pub fn shutdown(&self, cancel_pending: bool) {
        let was_accepting = self.inner.accepting.swap(false, Ordering::AcqRel);
        self.inner.tracker.close();
        if cancel_pending {
            self.inner.context.shutdown.cancel();
        }
        if was_accepting {
            tracing::info!(
                cancel_pending,
                in_flight = self.in_flight(),
                "dispatcher shutting down"
            );
        }
    }

    pub fn is_shut_down(&self) -> bool {
        !self.inner.accepting.load(Ordering::Acquire)
    }

    /// Wait until shutdown was requested and every admitted request has finished.
    pub async fn closed(&self) {
        self.inner.tracker.wait().await;
    }

    /// Admitted requests that have not reached a terminal state.
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    fn spawn(&self, request: Request, deadline: Option<Duration>, mode: Mode) -> DispatchHandle {
        if self.is_shut_down() {
            tracing::debug!(path = request.path(), "request refused after shutdown");
            return DispatchHandle::rejected(DispatchError::Closed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let span = tracing::debug_span!("dispatch", id, path = request.path());
        let mut coordinator = RetryCoordinator::new(self.inner.context.clone(), request);
        if let Some(deadline) = deadline {
            coordinator = coordinator.with_deadline(deadline);
        }
        let cancel = coordinator.cancel_token();
        let progress = coordinator.subscribe();
        let (tx, rx) = oneshot::channel();

        self.inner.tracker.spawn(
            async move {
                let result = match mode {
                    Mode::Retry => coordinator.run().await,
                    Mode::Once => coordinator.run_once().await,
                };
                // Receiver may have been dropped; the result is discarded then.
                let _ = tx.send(result);
            }
            .instrument(span),
        );

        DispatchHandle { result: rx, cancel, progress }
    }
}

/// Builder for `Dispatcher`.
#[derive(Debug)]
pub struct DispatcherBuilder {
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl DispatcherBuilder {
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the sleeper used for WAITING (tests use `TrackingSleeper` or `InstantSleeper`).
    pub fn sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Dispatcher {
        let config = self.config;
        let executor = AttemptExecutor::from_shared(self.transport, config.timeouts());
        let context = RetryContext::new(
            executor,
            config.backoff(),
            self.sleeper,
            WorkerGroup::new("attempt", config.attempt_workers()),
            WorkerGroup::new("retry", config.retry_workers()),
        );
        Dispatcher {
            inner: Arc::new(Inner {
                context: Arc::new(context),
                config,
                accepting: AtomicBool::new(true),
                tracker: TaskTracker::new(),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

/// Asynchronous result of one submitted request.
///
/// Resolves exactly once. Dropping the handle does not cancel the request; call
/// [`cancel`](Self::cancel) for that.
#[derive(Debug)]
pub struct DispatchHandle {
    result: oneshot::Receiver<Result<Success, DispatchError>>,
    cancel: CancellationToken,
    progress: watch::Receiver<Progress>,
}

impl DispatchHandle {
    fn rejected(err: DispatchError) -> Self {
        let (tx, result) = oneshot::channel();
        let _ = tx.send(Err(err));
        let (_, progress) = watch::channel(Progress { phase: RetryPhase::Rejected, attempts: 0 });
        Self { result, cancel: CancellationToken::new(), progress }
    }

    /// Cancel the request. A wait is aborted at once; an attempt on the wire finishes in the
    /// background and its result is discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn phase(&self) -> RetryPhase {
        self.progress.borrow().phase
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> usize {
        self.progress.borrow().attempts
    }

    pub fn progress(&self) -> Progress {
        *self.progress.borrow()
    }

    /// Wait until the coordinator publishes `phase` (or any terminal phase).
    pub async fn wait_for_phase(&mut self, phase: RetryPhase) -> RetryPhase {
        let reached = self
            .progress
            .wait_for(|p| p.phase == phase || p.phase.is_terminal())
            .await
            .map(|p| p.phase);
        reached.unwrap_or_else(|_| self.phase())
    }
}

impl Future for DispatchHandle {
    type Output = Result<Success, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the coordinator task was torn down with the runtime.
        Pin::new(&mut self.result).poll(cx).map(|received| {
            received.unwrap_or(Err(DispatchError::Cancelled(CancelCause::Shutdown)))
        })
    }
}

impl tower_service::Service<Request> for Dispatcher {
    type Response = Success;
    type Error = DispatchError;
    type Future = DispatchHandle;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.is_shut_down() {
            Poll::Ready(Err(DispatchError::Closed))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn call(&mut self, request: Request) -> Self::Future {
        self.submit(request)
    }
}
