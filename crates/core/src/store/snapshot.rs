//! Response snapshots as held by the cache storage.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How much of the response is visible to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    /// Same-origin response with readable status and headers.
    #[default]
    Basic,
    /// Cross-origin `no-cors` response; status is not observable.
    Opaque,
}

impl ResponseKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseKind::Basic => "basic",
            ResponseKind::Opaque => "opaque",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "basic" => Some(ResponseKind::Basic),
            "opaque" => Some(ResponseKind::Opaque),
            _ => None,
        }
    }
}

/// An immutable copy of a network response.
///
/// Served back exactly as captured: status, headers in their original order,
/// and body bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub kind: ResponseKind,
}

impl ResponseSnapshot {
    /// A basic response with the given status and body.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: Vec::new(), body: body.into(), kind: ResponseKind::Basic }
    }

    /// An opaque response. Opaque responses report status 0.
    pub fn opaque(body: impl Into<Vec<u8>>) -> Self {
        Self { status: 0, headers: Vec::new(), body: body.into(), kind: ResponseKind::Opaque }
    }

    /// Add a header, keeping insertion order.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Status in the 200-299 range.
    pub fn is_ok(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    /// Whether this response may be written to a cache.
    ///
    /// Error responses are never stored; opaque ones are, since their status
    /// cannot be inspected.
    pub fn is_cacheable(&self) -> bool {
        self.is_ok() || self.kind == ResponseKind::Opaque
    }

    /// First header value matching `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Hex SHA-256 of the body.
    pub fn body_digest(&self) -> String {
        hex::encode(Sha256::digest(&self.body))
    }
}
