//! The two extension points the transport offers to the application.
//!
//! `verify_handshake` runs during the upgrade with access to the raw request
//! but not the socket. `connection_established` runs after the upgrade with
//! the socket but none of the state created during verification. Bridging
//! the two is the implementor's job.

use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use gate_protocol::{HandshakeOutcome, Rejection};
use tokio::sync::oneshot;
use tracing::debug;

use crate::request::UpgradeRequest;

/// Trait implemented by the handshake gate. The transport calls
/// `verify_handshake` once per upgrade attempt and `connection_established`
/// once per accepted upgrade, in that order.
pub trait UpgradeHooks: Send + Sync + 'static {
    /// Decide whether the upgrade may proceed. Must resolve `completion`
    /// exactly once; dropping it counts as a bare rejection.
    fn verify_handshake(
        &self,
        request: Arc<UpgradeRequest>,
        completion: HandshakeCompletion,
    ) -> impl Future<Output = ()> + Send;

    /// Take over an upgraded socket.
    fn connection_established(
        &self,
        connection: WebSocket,
        request: Arc<UpgradeRequest>,
    ) -> impl Future<Output = ()> + Send;
}

/// Single-shot completion signal for one handshake.
///
/// Consumed by `accept`/`reject`, so a verifier cannot answer twice.
#[derive(Debug)]
pub struct HandshakeCompletion {
    tx: oneshot::Sender<HandshakeOutcome>,
}

impl HandshakeCompletion {
    /// Create a completion and the receiver the transport waits on.
    pub fn channel() -> (Self, oneshot::Receiver<HandshakeOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn accept(self) -> bool {
        self.complete(HandshakeOutcome::Accept)
    }

    pub fn reject(self, rejection: Rejection) -> bool {
        self.complete(HandshakeOutcome::Reject(rejection))
    }

    /// Deliver the outcome. Returns false when the transport has already
    /// torn the request down (client went away mid-verification).
    pub fn complete(self, outcome: HandshakeOutcome) -> bool {
        self.tx.send(outcome).is_ok()
    }
}

/// A live connection the gate can refuse by closing it.
pub trait Connection: Send + 'static {
    fn close(self, code: u16, reason: &'static str) -> impl Future<Output = ()> + Send;
}

impl Connection for WebSocket {
    fn close(mut self, code: u16, reason: &'static str) -> impl Future<Output = ()> + Send {
        async move {
            let frame = CloseFrame {
                code,
                reason: reason.into(),
            };
            if let Err(e) = self.send(Message::Close(Some(frame))).await {
                debug!("Close frame not delivered: {e}");
            }
        }
    }
}
