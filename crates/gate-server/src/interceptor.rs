//! HandshakeInterceptor: assigns an identity to each upgrade attempt and
//! turns the authorizer's verdict into an accept/reject decision.

use std::sync::Arc;

use gate_protocol::{ConnectionId, GateError, HandshakeOutcome, Rejection};
use gate_transport::{HandshakeCompletion, UpgradeRequest};
use tracing::{debug, warn};

use crate::authorizer::Authorizer;
use crate::correlation::CorrelationTable;

pub struct HandshakeInterceptor<A: Authorizer> {
    authorizer: Arc<A>,
    table: Arc<CorrelationTable>,
}

impl<A: Authorizer> HandshakeInterceptor<A> {
    pub fn new(authorizer: Arc<A>, table: Arc<CorrelationTable>) -> Self {
        Self { authorizer, table }
    }

    /// Verify one upgrade attempt and resolve `completion`.
    ///
    /// The identifier is generated and recorded before the authorizer is
    /// awaited, so the binder can always find it once the transport accepts.
    /// Returns the identifier when the upgrade was accepted.
    pub async fn verify(
        &self,
        request: &UpgradeRequest,
        completion: HandshakeCompletion,
    ) -> Option<ConnectionId> {
        let connection_id = ConnectionId::generate();

        let Some(key) = request.correlation_key() else {
            let err = GateError::MissingCorrelationKey;
            warn!("Rejecting malformed handshake from {:?}: {err}", request.remote_addr);
            completion.reject(Rejection::new(err.rejection_status(), err.to_string()));
            return None;
        };

        if let Err(err) = self.table.insert(key.clone(), connection_id) {
            warn!("Rejecting handshake {connection_id}: {err}");
            completion.reject(Rejection::new(err.rejection_status(), err.to_string()));
            return None;
        }

        debug!("Verifying handshake {key} as {connection_id}");

        let mut outcome = match self.authorizer.authorize(connection_id, request).await {
            Ok(verdict) => HandshakeOutcome::from(verdict),
            Err(e) => {
                warn!("Authorizer failed for {connection_id}: {e:#}");
                HandshakeOutcome::Reject(Rejection::bare())
            }
        };

        // The entry only starts aging once the upgrade is allowed.
        if outcome.is_accept() && !self.table.mark_accepted(&key, connection_id) {
            warn!("Handshake {connection_id} lost its correlation entry during verification");
            outcome = HandshakeOutcome::Reject(Rejection::bare());
        }

        let accepted = outcome.is_accept();
        if !accepted {
            self.table.release(&key, connection_id);
            debug!("Handshake {connection_id} rejected");
        }

        if !completion.complete(outcome) {
            debug!("Client left before handshake {connection_id} was decided");
            self.table.release(&key, connection_id);
            return None;
        }

        accepted.then_some(connection_id)
    }
}
