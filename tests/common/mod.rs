#![allow(dead_code)]

pub mod http_server;

use quota_dispatch::{
    Dispatcher, DispatcherConfig, RawResponse, Scripted, ScriptedTransport, Sleeper,
};

/// `429` body carrying a refill hint in milliseconds.
pub fn quota_exhausted(refill_in_ms: u64) -> String {
    format!(r#"{{"tokensLeft":-3,"refillIn":{refill_in_ms},"refillRate":20}}"#)
}

/// Transport that answers every call with `429` and the given refill hint.
pub fn always_exhausted(refill_in_ms: u64) -> ScriptedTransport {
    ScriptedTransport::new()
        .otherwise(Scripted::Respond(RawResponse::json(429, &quota_exhausted(refill_in_ms))))
}

pub fn dispatcher_with<S>(
    transport: &ScriptedTransport,
    config: DispatcherConfig,
    sleeper: S,
) -> Dispatcher
where
    S: Sleeper + 'static,
{
    Dispatcher::builder(transport.clone()).config(config).sleeper(sleeper).build()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
