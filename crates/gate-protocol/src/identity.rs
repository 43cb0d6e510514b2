//! Identifiers that link the two halves of a WebSocket upgrade.
//!
//! A [`CorrelationKey`] is chosen by the client (it is the value of the
//! `Sec-WebSocket-Key` handshake header). A [`ConnectionId`] is chosen by the
//! server at verification time and follows the connection into the registry.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the handshake header carrying the client nonce.
pub const CORRELATION_HEADER: &str = "sec-websocket-key";

/// Server-assigned identity for one connection.
///
/// Backed by a random (v4) UUID, so two identifiers generated by the same
/// process never collide in practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Client-supplied handshake nonce used to find a pending [`ConnectionId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Wrap a raw header value. Empty values are not valid keys.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
