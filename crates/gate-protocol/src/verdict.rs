//! Authorization verdicts and the handshake outcomes derived from them.
//!
//! Decision flow:
//!   1. The interceptor asks an authorizer for a [`Verdict`]
//!   2. The verdict is translated into a [`HandshakeOutcome`]
//!   3. The transport turns the outcome into an upgrade or an HTTP refusal

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Authorizer → Interceptor
// ─────────────────────────────────────────────────────────────────────────────

/// Decision returned by an authorizer for one upgrade request.
///
/// Rejection metadata is only meaningful when `verified` is false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub verified: bool,
    #[serde(rename = "statusCode", skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
}

impl Verdict {
    pub fn allow() -> Self {
        Self {
            verified: true,
            ..Self::default()
        }
    }

    pub fn deny() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interceptor → Transport
// ─────────────────────────────────────────────────────────────────────────────

/// Metadata attached to a refused upgrade. Absent fields fall back to the
/// transport's defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rejection {
    pub status: Option<u16>,
    pub message: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl Rejection {
    /// A refusal that forwards nothing (used when the authorizer itself fails).
    pub fn bare() -> Self {
        Self::default()
    }

    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: Some(message.into()),
            headers: BTreeMap::new(),
        }
    }

    pub fn is_bare(&self) -> bool {
        self.status.is_none() && self.message.is_none() && self.headers.is_empty()
    }
}

/// Final accept/reject decision delivered to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Accept,
    Reject(Rejection),
}

impl HandshakeOutcome {
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

impl From<Verdict> for HandshakeOutcome {
    fn from(verdict: Verdict) -> Self {
        if verdict.verified {
            return Self::Accept;
        }
        Self::Reject(Rejection {
            status: verdict.status_code,
            message: verdict.message,
            headers: verdict.headers.unwrap_or_default(),
        })
    }
}
