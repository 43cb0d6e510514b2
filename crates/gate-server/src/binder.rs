//! ConnectionBinder: recovers the identity assigned during verification and
//! hands the live connection to the registry.

use std::sync::Arc;

use gate_protocol::{ConnectionId, GateError};
use gate_transport::{Connection, UpgradeRequest};
use tracing::{debug, warn};

use crate::correlation::CorrelationTable;
use crate::registry::Registry;

/// Close code sent to a connection whose identity cannot be recovered.
pub const CLOSE_UNKNOWN_IDENTITY: u16 = 1011;

pub struct ConnectionBinder<R: Registry> {
    registry: Arc<R>,
    table: Arc<CorrelationTable>,
}

impl<R: Registry> ConnectionBinder<R> {
    pub fn new(registry: Arc<R>, table: Arc<CorrelationTable>) -> Self {
        Self { registry, table }
    }

    /// Register `connection` under the identifier recorded for its request.
    ///
    /// A missing entry is fatal for this connection only: it is closed
    /// instead of being registered without an identity.
    pub async fn bind(
        &self,
        connection: R::Connection,
        request: &UpgradeRequest,
    ) -> Option<ConnectionId> {
        let resolved = request
            .correlation_key()
            .ok_or(GateError::MissingCorrelationKey)
            .and_then(|key| self.table.take(&key).ok_or(GateError::CorrelationMiss(key)));

        match resolved {
            Ok(connection_id) => {
                debug!("Binding connection {connection_id}");
                self.registry.register(connection, connection_id);
                Some(connection_id)
            }
            Err(err) => {
                warn!("Refusing established connection: {err}");
                connection.close(CLOSE_UNKNOWN_IDENTITY, "connection identity unknown").await;
                None
            }
        }
    }
}
