#![forbid(unsafe_code)]

//! # quota-dispatch
//!
//! Asynchronous, token-bucket-aware retry dispatcher for quota-metered HTTP APIs.
//!
//! Every call to the remote API consumes tokens from a server-tracked budget that refills over
//! time. When the budget is exhausted the server answers `429` with a refill hint instead of an
//! error meant for the end user. The dispatcher turns one logical [`Request`] into as many
//! attempts as needed, classifies each [`Outcome`], waits as the server directs (or backs off
//! exponentially), and resolves exactly one result per request.
//!
//! ## Features
//!
//! - **Outcome classification**: success, quota exhausted, transient, terminal
//! - **Server-directed waits** using the `refillIn` hint plus a small grace
//! - **Exponential backoff** (`100ms, 300ms, 700ms, ...`, capped at 60s) for everything else
//! - **Bounded concurrency** through two fair worker groups (attempts and coordinators)
//! - **Cancellation** per request, by deadline, or by `shutdown(true)`
//! - **Tower integration**: `Dispatcher` is a `tower_service::Service<Request>`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quota_dispatch::{Dispatcher, DispatcherConfig, HttpTransport, Request};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DispatcherConfig::builder()
//!         .attempt_workers(4)
//!         .read_timeout(Duration::from_secs(60))
//!         .build()
//!         .unwrap();
//!     let dispatcher = Dispatcher::new(HttpTransport::builder("access-key").build(), config);
//!
//!     let handle = dispatcher.submit_with_deadline(
//!         Request::new("product").param("domain", "1").param("asin", "B000000000"),
//!         Duration::from_secs(300),
//!     );
//!     match handle.await {
//!         Ok(success) => println!("refill in {:?}", success.quota.map(|q| q.refill_in)),
//!         Err(err) if err.is_cancelled() => eprintln!("gave up: {err}"),
//!         Err(err) => eprintln!("request failed: {err}"),
//!     }
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod outcome;
pub mod request;
pub mod sleeper;
pub mod state;
pub mod transport;
pub mod worker;

// Re-exports
pub use backoff::{BackoffError, BackoffPolicy, Wait, WaitSource};
pub use config::{DispatcherConfig, DispatcherConfigBuilder};
pub use coordinator::{Progress, RetryContext, RetryCoordinator};
pub use dispatcher::{DispatchHandle, Dispatcher, DispatcherBuilder};
pub use envelope::{ApiError, Envelope, QuotaSnapshot};
pub use error::{CancelCause, ConfigError, DecodeError, DispatchError, TransportError};
pub use executor::AttemptExecutor;
pub use outcome::{FailureKind, Outcome, Success, TerminalFailure, TransientCause};
pub use request::{Method, Request, Timeouts};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use state::{RetryPhase, RetryState};
pub use transport::{HttpTransport, RawResponse, Scripted, ScriptedTransport, Transport};
pub use worker::WorkerGroup;

pub mod prelude;
