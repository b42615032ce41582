//! Convenient re-exports for common dispatcher types.
pub use crate::{
    backoff::BackoffPolicy,
    config::DispatcherConfig,
    dispatcher::{DispatchHandle, Dispatcher},
    error::{CancelCause, DispatchError},
    outcome::{Outcome, Success},
    request::{Request, Timeouts},
    state::RetryPhase,
    transport::{HttpTransport, Transport},
};
