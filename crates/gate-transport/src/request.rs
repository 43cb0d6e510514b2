//! Snapshot of an inbound upgrade request.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::Query;
use axum::http::{HeaderMap, Method, Uri};
use gate_protocol::{CORRELATION_HEADER, CorrelationKey};

/// The raw request seen by both hooks of one upgrade.
///
/// The transport hands the same instance to `verify_handshake` and, if the
/// upgrade is accepted, to `connection_established`.
#[derive(Debug, Clone)]
pub struct UpgradeRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Peer address (absent when the listener does not record it)
    pub remote_addr: Option<SocketAddr>,
    /// When the transport first saw the request
    pub received_at: Instant,
}

impl UpgradeRequest {
    pub fn new(method: Method, uri: Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            uri,
            headers,
            remote_addr: None,
            received_at: Instant::now(),
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// The client nonce that links this request to its eventual connection.
    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        self.header(CORRELATION_HEADER).and_then(CorrelationKey::new)
    }

    /// Header value as text; non-UTF-8 values are treated as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Percent-decoded query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let Query(mut params) = Query::<HashMap<String, String>>::try_from_uri(&self.uri).ok()?;
        params.remove(name)
    }
}
