//! Upgrade Gate Transport Layer
//!
//! Serves WebSocket upgrades over Axum and exposes exactly two hook points:
//! - `verify_handshake`: raw request in, accept/reject decision out
//! - `connection_established`: upgraded socket in, ownership handed over
//!
//! The transport keeps no application state between the two calls. It
//! guarantees that, for one request, verification completes before the
//! connection hook fires.

pub mod hooks;
pub mod request;
pub mod server;

pub use hooks::{Connection, HandshakeCompletion, UpgradeHooks};
pub use request::UpgradeRequest;
pub use server::{TlsConfig, TransportConfig, TransportServer};
