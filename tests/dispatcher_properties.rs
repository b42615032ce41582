//! End-to-end timing and concurrency behavior of the dispatcher, in virtual time.
mod common;

use common::{always_exhausted, dispatcher_with, quota_exhausted};
use quota_dispatch::{
    CancelCause, DispatchError, DispatcherConfig, FailureKind, RawResponse, Request, RetryPhase,
    Scripted, ScriptedTransport, TokioSleeper, TrackingSleeper, TransportError,
};
use std::time::Duration;
use tokio::time::Instant;

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

fn reset() -> TransportError {
    TransportError::Io("connection reset by peer".into())
}

#[tokio::test(start_paused = true)]
async fn quota_wait_honors_refill_hint_plus_grace() {
    let transport = ScriptedTransport::new()
        .respond(429, &quota_exhausted(5000))
        .respond(200, r#"{"tokensLeft":15}"#);
    let dispatcher = dispatcher_with(&transport, DispatcherConfig::default(), TokioSleeper);

    dispatcher.submit(Request::new("product")).await.unwrap();

    let started = transport.started_at();
    assert_eq!(started.len(), 2);
    assert!(started[1] - started[0] >= ms(5100), "gap was {:?}", started[1] - started[0]);
}

#[tokio::test]
async fn transient_failures_back_off_exponentially_up_to_cap() {
    let mut transport = ScriptedTransport::new();
    for _ in 0..11 {
        transport = transport.fail(reset());
    }
    let transport = transport.respond(200, "{}");
    let sleeper = TrackingSleeper::new();
    let dispatcher = dispatcher_with(&transport, DispatcherConfig::default(), sleeper.clone());

    dispatcher.submit(Request::new("product")).await.unwrap();

    let waits: Vec<u128> = sleeper.waits().iter().map(Duration::as_millis).collect();
    assert_eq!(
        waits,
        vec![100, 300, 700, 1500, 3100, 6300, 12700, 25500, 51100, 60000, 60000]
    );
}

#[tokio::test]
async fn backoff_restarts_at_shortest_tier_after_success() {
    let transport = ScriptedTransport::new()
        .fail(reset())
        .fail(reset())
        .respond(200, "{}")
        .fail(reset())
        .respond(200, "{}");
    let sleeper = TrackingSleeper::new();
    let dispatcher = dispatcher_with(&transport, DispatcherConfig::default(), sleeper.clone());

    dispatcher.submit(Request::new("product")).await.unwrap();
    dispatcher.submit(Request::new("product")).await.unwrap();

    assert_eq!(sleeper.waits(), vec![ms(100), ms(300), ms(100)]);
}

#[tokio::test]
async fn terminal_status_rejects_after_one_attempt_without_waiting() {
    let transport = ScriptedTransport::new()
        .respond(400, r#"{"tokensLeft":40,"error":{"type":"invalidParameter"}}"#)
        .respond(200, "{}");
    let sleeper = TrackingSleeper::new();
    let dispatcher = dispatcher_with(&transport, DispatcherConfig::default(), sleeper.clone());

    let err = dispatcher.submit(Request::new("product")).await.unwrap_err();

    assert!(err.is_terminal());
    assert!(!err.is_cancelled());
    assert_eq!(err.status_code(), Some(400));
    assert_eq!(err.quota().map(|q| q.tokens_left), Some(40));
    assert_eq!(err.as_terminal().map(|t| t.kind), Some(FailureKind::RequestRejected));
    assert_eq!(transport.call_count(), 1);
    assert!(sleeper.waits().is_empty());
}

#[tokio::test(start_paused = true)]
async fn attempts_in_flight_never_exceed_attempt_workers() {
    let transport = ScriptedTransport::new()
        .with_latency(ms(50))
        .otherwise(Scripted::Respond(RawResponse::json(200, "{}")));
    let config = DispatcherConfig::builder().attempt_workers(4).retry_workers(50).build().unwrap();
    let dispatcher = dispatcher_with(&transport, config, TokioSleeper);

    let handles: Vec<_> = (0..50)
        .map(|i| dispatcher.submit(Request::new("product").param("n", i.to_string())))
        .collect();
    let results = futures::future::join_all(handles).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(transport.call_count(), 50);
    assert_eq!(transport.peak_in_flight(), 4);
}

#[tokio::test(start_paused = true)]
async fn waiting_coordinators_do_not_hold_attempt_workers() {
    // One attempt worker; the first request spends a minute waiting on quota while the
    // second must still get through.
    let transport = ScriptedTransport::new()
        .respond(429, &quota_exhausted(60_000))
        .respond(200, r#"{"payload":"second"}"#)
        .respond(200, r#"{"payload":"first"}"#);
    let config = DispatcherConfig::builder().attempt_workers(1).build().unwrap();
    let dispatcher = dispatcher_with(&transport, config, TokioSleeper);

    let mut first = dispatcher.submit(Request::new("product"));
    assert_eq!(first.wait_for_phase(RetryPhase::Waiting).await, RetryPhase::Waiting);
    let start = Instant::now();
    let second = dispatcher.submit(Request::new("product")).await.unwrap();

    assert_eq!(second.envelope.payload["payload"], "second");
    assert!(start.elapsed() < ms(1000));
    assert_eq!(first.await.unwrap().envelope.payload["payload"], "first");
}

#[tokio::test]
async fn equal_requests_in_sequence_keep_independent_backoff() {
    let transport = ScriptedTransport::new()
        .fail(reset())
        .fail(reset())
        .fail(reset())
        .respond(200, "{}")
        .fail(reset())
        .respond(200, "{}");
    let sleeper = TrackingSleeper::new();
    let dispatcher = dispatcher_with(&transport, DispatcherConfig::default(), sleeper.clone());
    let request = Request::new("product").param("asin", "B000000000");

    dispatcher.submit(request.clone()).await.unwrap();
    dispatcher.submit(request).await.unwrap();

    assert_eq!(sleeper.waits(), vec![ms(100), ms(300), ms(700), ms(100)]);
    assert_eq!(transport.call_count(), 6);
}

#[tokio::test(start_paused = true)]
async fn concurrent_equal_requests_back_off_independently() {
    // Calls in start order: a@0 fail, b@50 fail, a@100 fail, b@150 ok, a@400 fail, a@1100 ok.
    let transport = ScriptedTransport::new()
        .fail(reset())
        .fail(reset())
        .fail(reset())
        .respond(200, r#"{"payload":"b"}"#)
        .fail(reset())
        .respond(200, r#"{"payload":"a"}"#);
    let dispatcher = dispatcher_with(&transport, DispatcherConfig::default(), TokioSleeper);
    let request = Request::new("product").param("asin", "B000000000");

    let a = dispatcher.submit(request.clone());
    tokio::time::sleep(ms(50)).await;
    let b = dispatcher.submit(request);
    let (a, b) = tokio::join!(a, b);

    assert_eq!(a.unwrap().envelope.payload["payload"], "a");
    assert_eq!(b.unwrap().envelope.payload["payload"], "b");
    let started = transport.started_at();
    assert_eq!(started.len(), 6);
    // a: 100, 300, 700 after its own failures.
    assert_eq!(started[2] - started[0], ms(100));
    assert_eq!(started[4] - started[2], ms(300));
    assert_eq!(started[5] - started[4], ms(700));
    // b: first tier despite a's earlier failure.
    assert_eq!(started[3] - started[1], ms(100));
}

#[tokio::test(start_paused = true)]
async fn cancel_during_wait_rejects_promptly() {
    let transport = always_exhausted(600_000);
    let dispatcher = dispatcher_with(&transport, DispatcherConfig::default(), TokioSleeper);

    let mut handle = dispatcher.submit(Request::new("product"));
    assert_eq!(handle.wait_for_phase(RetryPhase::Waiting).await, RetryPhase::Waiting);
    let start = Instant::now();
    handle.cancel();
    let err = handle.await.unwrap_err();

    assert_eq!(err, DispatchError::Cancelled(CancelCause::Caller));
    assert!(start.elapsed() < ms(10), "took {:?}", start.elapsed());
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_attempt_discards_result_and_stops_retrying() {
    let transport = ScriptedTransport::new()
        .with_latency(Duration::from_secs(5))
        .otherwise(Scripted::Respond(RawResponse::json(429, &quota_exhausted(1000))));
    let dispatcher = dispatcher_with(&transport, DispatcherConfig::default(), TokioSleeper);

    let mut handle = dispatcher.submit(Request::new("product"));
    handle.wait_for_phase(RetryPhase::Attempting).await;
    handle.cancel();
    let err = handle.await.unwrap_err();
    assert_eq!(err.cancel_cause(), Some(CancelCause::Caller));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn deadline_bounds_unlimited_quota_retries() {
    let transport = always_exhausted(2000);
    let dispatcher = dispatcher_with(&transport, DispatcherConfig::default(), TokioSleeper);

    let err = dispatcher
        .submit_with_deadline(Request::new("product"), Duration::from_secs(7))
        .await
        .unwrap_err();

    assert_eq!(err, DispatchError::Cancelled(CancelCause::Deadline(Duration::from_secs(7))));
    // Attempts at 0, 2.1s, 4.2s, 6.3s.
    assert_eq!(transport.call_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn quota_then_unhinted_quota_then_success() {
    let transport = ScriptedTransport::new()
        .respond(429, r#"{"refillIn":2000}"#)
        .respond(429, r#"{"refillIn":0}"#)
        .respond(200, r#"{"payload":"X"}"#);
    let dispatcher = dispatcher_with(&transport, DispatcherConfig::default(), TokioSleeper);

    let success = dispatcher.submit(Request::new("product")).await.unwrap();

    let started = transport.started_at();
    assert_eq!(started.len(), 3);
    assert!(started[1] - started[0] >= ms(2100));
    assert!(started[2] - started[1] >= ms(100));
    assert!(started[2] - started[1] < ms(300));
    assert_eq!(success.payload_as::<serde_json::Value>().unwrap()["payload"], "X");
}
