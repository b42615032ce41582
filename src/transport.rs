//! Transport abstraction
//!
//! A transport performs exactly one HTTP exchange and reports the raw status and body bytes.
//! It never interprets the body; decoding and classification belong to the attempt executor.
//!
//! - `HttpTransport`: production transport on `reqwest`, adds the access key, user agent, and
//!   gzip/keep-alive headers.
//! - `ScriptedTransport`: test double replaying scripted responses while recording call start
//!   times and peak concurrency.

use crate::error::TransportError;
use crate::request::{encode_pairs, Method, Timeouts};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Default API endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.keepa.com/";

/// A fully formed call handed to a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportCall {
    pub method: Method,
    pub path: String,
    /// Already percent-encoded request parameters.
    pub query: String,
    pub body: Option<String>,
    pub timeouts: Timeouts,
}

/// Status and undecoded body of one exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Response with a gzip-compressed JSON body, as the API sends them.
    pub fn json(status: u16, json: &str) -> Self {
        Self { status, body: gzip(json.as_bytes()) }
    }

    /// Response without a body.
    pub fn empty(status: u16) -> Self {
        Self { status, body: Vec::new() }
    }
}

/// Gzip-compress `bytes`. Falls back to the uncompressed bytes if the encoder fails.
pub fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    match encoder.write_all(bytes).and_then(|_| encoder.finish()) {
        Ok(compressed) => compressed,
        Err(_) => bytes.to_vec(),
    }
}

/// One HTTP(S) exchange.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    async fn send(&self, call: TransportCall) -> Result<RawResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, call: TransportCall) -> Result<RawResponse, TransportError> {
        (**self).send(call).await
    }
}

/// Production transport backed by `reqwest`.
///
/// `connect` bounds connection setup and `read` bounds each read from the socket, so a slow
/// response that keeps delivering bytes is never cut off. Clients are cached per `Timeouts`
/// value so per-request overrides do not rebuild connection pools on every attempt.
pub struct HttpTransport {
    base_url: String,
    access_key: String,
    user_agent: String,
    clients: Mutex<HashMap<Timeouts, reqwest::Client>>,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("access_key", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl HttpTransport {
    pub fn builder(access_key: impl Into<String>) -> HttpTransportBuilder {
        HttpTransportBuilder::new(access_key)
    }

    /// Full URL for a call: base + path, access key first, then the request parameters.
    pub fn url_for(&self, call: &TransportCall) -> String {
        let key = encode_pairs([("key", self.access_key.as_str())]);
        if call.query.is_empty() {
            format!("{}{}?{}", self.base_url, call.path, key)
        } else {
            format!("{}{}?{}&{}", self.base_url, call.path, key, call.query)
        }
    }

    fn client(&self, timeouts: Timeouts) -> Result<reqwest::Client, TransportError> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = clients.get(&timeouts) {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .read_timeout(timeouts.read)
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        clients.insert(timeouts, client.clone());
        Ok(client)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Io(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, call: TransportCall) -> Result<RawResponse, TransportError> {
        use reqwest::header::{ACCEPT_ENCODING, CONNECTION, CONTENT_TYPE};

        let client = self.client(call.timeouts)?;
        let url = self.url_for(&call);
        let builder = match call.method {
            Method::Get => client.get(url),
            Method::Post => client.post(url),
        }
        .header(CONNECTION, "keep-alive")
        .header(ACCEPT_ENCODING, "gzip");
        let builder = match call.body {
            Some(body) => {
                builder.header(CONTENT_TYPE, "application/json; charset=UTF-8").body(body)
            }
            None => builder,
        };

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            // A 200 without its body is useless; keep the transport cause.
            Err(err) if status == 200 => return Err(map_reqwest_error(err)),
            // Other statuses classify on the status alone.
            Err(err) => {
                tracing::debug!(status, error = %err, "failed to read response body");
                Vec::new()
            }
        };
        Ok(RawResponse { status, body })
    }
}

/// Builder for `HttpTransport`.
#[derive(Debug, Clone)]
pub struct HttpTransportBuilder {
    access_key: String,
    base_url: String,
    user_agent: String,
}

impl HttpTransportBuilder {
    pub fn new(access_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }

    /// Endpoint the request paths are appended to. A trailing `/` is added if missing.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        let mut base = base_url.into();
        if !base.ends_with('/') {
            base.push('/');
        }
        self.base_url = base;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> HttpTransport {
        HttpTransport {
            base_url: self.base_url,
            access_key: self.access_key,
            user_agent: self.user_agent,
            clients: Mutex::new(HashMap::new()),
        }
    }
}

/// A scripted reply.
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(RawResponse),
    Fail(TransportError),
}

#[derive(Debug, Default)]
struct ScriptState {
    queue: VecDeque<Scripted>,
    otherwise: Option<Scripted>,
    calls: Vec<TransportCall>,
    started: Vec<tokio::time::Instant>,
}

/// Test transport replaying scripted replies in order.
///
/// Once the script is exhausted the `otherwise` reply is used; without one, calls fail with a
/// transport I/O error. Call start instants use `tokio::time` so they follow a paused clock.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
    latency: Duration,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold every call open for `latency` before replying.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a gzip JSON reply.
    pub fn respond(self, status: u16, json: &str) -> Self {
        self.push(Scripted::Respond(RawResponse::json(status, json)))
    }

    /// Queue a transport failure.
    pub fn fail(self, err: TransportError) -> Self {
        self.push(Scripted::Fail(err))
    }

    pub fn push(self, reply: Scripted) -> Self {
        self.lock().queue.push_back(reply);
        self
    }

    /// Reply used once the queue is empty.
    pub fn otherwise(self, reply: Scripted) -> Self {
        self.lock().otherwise = Some(reply);
        self
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Instants at which each call started, in call order.
    pub fn started_at(&self) -> Vec<tokio::time::Instant> {
        self.lock().started.clone()
    }

    /// Largest number of calls observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, call: TransportCall) -> Result<RawResponse, TransportError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);

        let reply = {
            let mut state = self.lock();
            state.calls.push(call);
            state.started.push(tokio::time::Instant::now());
            state.queue.pop_front().or_else(|| state.otherwise.clone())
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(err)) => Err(err),
            None => Err(TransportError::Io("script exhausted".to_string())),
        }
    }
}
