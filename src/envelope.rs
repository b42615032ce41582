//! Response envelope decoding.
//!
//! Bodies arrive gzip-compressed. Only the fields the dispatcher reads (quota counters and the
//! error object) are typed; the rest of the payload is kept as a JSON map for the caller.

use crate::error::DecodeError;
use flate2::read::GzDecoder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::io::Read;
use std::time::Duration;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Server-side token bucket counters as reported with one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaSnapshot {
    pub tokens_left: i64,
    /// Time until the next token replenishment.
    pub refill_in: Duration,
    /// Tokens granted per minute.
    pub refill_rate: i64,
}

/// Error object returned by the API alongside non-200 statuses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub message: Option<String>,
    pub details: Option<String>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind.as_deref().unwrap_or("error");
        match (&self.message, &self.details) {
            (Some(m), Some(d)) => write!(f, "{}: {} ({})", kind, m, d),
            (Some(m), None) => write!(f, "{}: {}", kind, m),
            (None, Some(d)) => write!(f, "{} ({})", kind, d),
            (None, None) => write!(f, "{}", kind),
        }
    }
}

/// Common response envelope.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Server time when the response was sent (epoch millis).
    pub timestamp: Option<i64>,
    pub tokens_left: Option<i64>,
    /// Milliseconds until new tokens are generated.
    pub refill_in: Option<i64>,
    /// Tokens per minute.
    pub refill_rate: Option<i64>,
    pub processing_time_in_ms: Option<i64>,
    pub token_flow_reduction: Option<f64>,
    pub tokens_consumed: Option<i64>,
    pub error: Option<ApiError>,
    /// Everything else in the body.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Envelope {
    /// Quota counters, present when the server reported any of them.
    pub fn quota(&self) -> Option<QuotaSnapshot> {
        if self.tokens_left.is_none() && self.refill_in.is_none() && self.refill_rate.is_none() {
            return None;
        }
        let refill_ms = u64::try_from(self.refill_in.unwrap_or(0)).unwrap_or(0);
        Some(QuotaSnapshot {
            tokens_left: self.tokens_left.unwrap_or(0),
            refill_in: Duration::from_millis(refill_ms),
            refill_rate: self.refill_rate.unwrap_or(0),
        })
    }

    /// Decode the payload fields into a caller-defined type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_value(Value::Object(self.payload.clone()))
            .map_err(|e| DecodeError::Json(e.to_string()))
    }
}

/// Decompress (when gzip-framed) and parse a response body.
pub fn decode_body(body: &[u8]) -> Result<Envelope, DecodeError> {
    if body.is_empty() {
        return Err(DecodeError::Empty);
    }
    if body.starts_with(&GZIP_MAGIC) {
        let mut json = Vec::with_capacity(body.len() * 4);
        GzDecoder::new(body)
            .read_to_end(&mut json)
            .map_err(|e| DecodeError::Gzip(e.to_string()))?;
        parse_json(&json)
    } else {
        parse_json(body)
    }
}

fn parse_json(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    serde_json::from_slice(bytes).map_err(|e| DecodeError::Json(e.to_string()))
}
