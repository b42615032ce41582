//! Logical request values.
//!
//! A [`Request`] is immutable once built and compared by value. Submitting two equal requests
//! starts two independent retry sequences; nothing is keyed on request identity.

use std::collections::BTreeMap;
use std::time::Duration;

/// Default time allowed to establish a connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Default time allowed to receive a response once connected.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Connect/read timeouts applied to a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeouts {
    pub connect: Duration,
    pub read: Duration,
}

impl Timeouts {
    pub fn new(connect: Duration, read: Duration) -> Self {
        Self { connect, read }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { connect: DEFAULT_CONNECT_TIMEOUT, read: DEFAULT_READ_TIMEOUT }
    }
}

/// HTTP method implied by a request: POST iff a body is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// One logical call against the remote API.
///
/// Parameters are kept in a sorted map so equal requests serialize identically regardless of
/// insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    path: String,
    params: BTreeMap<String, String>,
    body: Option<String>,
    timeouts: Option<Timeouts>,
}

impl Request {
    /// Create a GET request for `path` with no parameters.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), params: BTreeMap::new(), body: None, timeouts: None }
    }

    /// Add (or replace) a query parameter.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Attach a UTF-8 JSON body; the request becomes a POST.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Override the dispatcher's default timeouts for this request only.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = Some(timeouts);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn post_body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn timeout_override(&self) -> Option<Timeouts> {
        self.timeouts
    }

    pub fn method(&self) -> Method {
        if self.body.is_some() {
            Method::Post
        } else {
            Method::Get
        }
    }

    /// Percent-encoded `key=value` pairs joined with `&`.
    pub fn query_string(&self) -> String {
        encode_pairs(self.params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// Form-encode `pairs` as UTF-8 `key=value` joined with `&`.
pub(crate) fn encode_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    pairs
        .into_iter()
        .map(|(k, v)| {
            let key: String = url::form_urlencoded::byte_serialize(k.as_bytes()).collect();
            let value: String = url::form_urlencoded::byte_serialize(v.as_bytes()).collect();
            format!("{}={}", key, value)
        })
        .collect::<Vec<_>>()
        .join("&")
}
