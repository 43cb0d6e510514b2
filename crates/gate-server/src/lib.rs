//! Upgrade Gate Server: correlates WebSocket handshakes with the
//! connections they produce.
//!
//! The interceptor assigns each upgrade a [`ConnectionId`] and records it in
//! the [`CorrelationTable`] under the request's `Sec-WebSocket-Key` before
//! asking the [`Authorizer`]. Once the transport completes an accepted
//! upgrade, the binder takes that entry back out and hands the socket to the
//! [`Registry`].
//!
//! [`ConnectionId`]: gate_protocol::ConnectionId

pub mod authorizer;
pub mod binder;
pub mod correlation;
pub mod gateway;
pub mod interceptor;
pub mod registry;

pub use authorizer::{AuthConfig, Authorizer, TokenAuthorizer};
pub use binder::ConnectionBinder;
pub use correlation::CorrelationTable;
pub use gateway::{GatewayConfig, GatewayHooks, WebSocketGateway};
pub use interceptor::HandshakeInterceptor;
pub use registry::{ConnectionRegistry, Registry};
