//! Error types for the handshake gate.

use thiserror::Error;

use crate::identity::CorrelationKey;

/// Status sent when the upgrade request is malformed or reuses a pending key.
pub const STATUS_BAD_REQUEST: u16 = 400;

/// Status sent when a refusal carries no status of its own.
pub const STATUS_UNAUTHORIZED: u16 = 401;

/// Errors raised while gating or serving upgrades.
///
/// Per-request variants never escape the gate: the interceptor and binder
/// turn them into reject or close decisions. The remaining variants surface
/// from listener startup.
#[derive(Debug, Error)]
pub enum GateError {
    /// The upgrade request carried no usable `Sec-WebSocket-Key`.
    #[error("missing Sec-WebSocket-Key header")]
    MissingCorrelationKey,

    /// Another in-flight handshake already holds this key.
    #[error("correlation key already in use: {0}")]
    KeyInUse(CorrelationKey),

    /// An established connection had no pending entry.
    #[error("no pending handshake for correlation key {0}")]
    CorrelationMiss(CorrelationKey),

    #[error("invalid upgrade path: {0:?} (must start with '/' and not be /health)")]
    InvalidPath(String),

    #[error("invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("failed to load TLS material: {0}")]
    Tls(#[source] std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// HTTP status sent when this error refuses a handshake.
    pub fn rejection_status(&self) -> u16 {
        match self {
            Self::MissingCorrelationKey | Self::KeyInUse(_) => STATUS_BAD_REQUEST,
            _ => STATUS_UNAUTHORIZED,
        }
    }
}

pub type GateResult<T> = Result<T, GateError>;
