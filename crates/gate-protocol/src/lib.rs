//! Upgrade Gate - Protocol Types
//!
//! Types shared by the transport and the handshake gate: the identifiers
//! that correlate a handshake with its connection, authorizer verdicts,
//! transport outcomes, route descriptors, and the error type.

pub mod error;
pub mod identity;
pub mod route;
pub mod verdict;

pub use error::{GateError, GateResult};
pub use identity::{CORRELATION_HEADER, ConnectionId, CorrelationKey};
pub use route::RouteDescriptor;
pub use verdict::{HandshakeOutcome, Rejection, Verdict};
