//! Registry collaborator and the in-process ConnectionRegistry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use gate_protocol::{ConnectionId, RouteDescriptor};
use gate_transport::Connection;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Close code sent to clients when the registry shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Owner of established connections.
pub trait Registry: Send + Sync + 'static {
    type Connection: Connection;

    /// Take ownership of `connection` under `connection_id`.
    fn register(&self, connection: Self::Connection, connection_id: ConnectionId);

    /// Configuration-time route registration.
    fn add_route(&self, route_key: &str, descriptor: RouteDescriptor);
}

/// Internal entry in the registry: one per live client.
struct ClientEntry {
    connected_at: Instant,
    shutdown_tx: mpsc::Sender<()>,
}

/// Holds upgraded WebSocket clients by identifier, plus the route table.
///
/// Each registered socket is served by its own task, which removes the
/// entry when the client goes away. Uses parking_lot::RwLock (sync) so the
/// maps can be read from both sync and async contexts.
pub struct ConnectionRegistry {
    clients: Arc<RwLock<HashMap<ConnectionId, ClientEntry>>>,
    routes: RwLock<HashMap<String, RouteDescriptor>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            routes: RwLock::new(HashMap::new()),
        }
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.clients.read().contains_key(connection_id)
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.clients.read().keys().copied().collect()
    }

    /// When the client was registered.
    pub fn connected_at(&self, connection_id: &ConnectionId) -> Option<Instant> {
        self.clients.read().get(connection_id).map(|c| c.connected_at)
    }

    pub fn route(&self, route_key: &str) -> Option<RouteDescriptor> {
        self.routes.read().get(route_key).cloned()
    }

    pub fn routes(&self) -> Vec<(String, RouteDescriptor)> {
        let mut routes: Vec<_> = self
            .routes
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        routes.sort_by(|a, b| a.0.cmp(&b.0));
        routes
    }

    /// Close every client (called during gateway shutdown).
    pub async fn shutdown_all(&self) {
        // Drain while holding the lock briefly; signal outside it.
        let entries: Vec<_> = self.clients.write().drain().collect();
        for (id, entry) in entries {
            debug!("Closing client: {id}");
            let _ = entry.shutdown_tx.send(()).await;
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry for ConnectionRegistry {
    type Connection = WebSocket;

    fn register(&self, connection: WebSocket, connection_id: ConnectionId) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let total = {
            let mut clients = self.clients.write();
            clients.insert(
                connection_id,
                ClientEntry {
                    connected_at: Instant::now(),
                    shutdown_tx,
                },
            );
            clients.len()
        };
        info!("Client registered: {connection_id} (total: {total})");

        let clients = self.clients.clone();
        tokio::spawn(async move {
            serve_client(connection, connection_id, shutdown_rx).await;
            let total = {
                let mut clients = clients.write();
                clients.remove(&connection_id);
                clients.len()
            };
            info!("Client disconnected: {connection_id} (total: {total})");
        });
    }

    fn add_route(&self, route_key: &str, descriptor: RouteDescriptor) {
        info!("Route added: {route_key} -> {}", descriptor.handler);
        if let Some(previous) = self.routes.write().insert(route_key.to_string(), descriptor) {
            warn!("Route {route_key} replaced (was {})", previous.handler);
        }
    }
}

enum ClientEvent {
    Inbound(Option<Result<Message, axum::Error>>),
    Shutdown,
}

async fn serve_client(
    mut socket: WebSocket,
    connection_id: ConnectionId,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            msg = socket.recv() => ClientEvent::Inbound(msg),
            _ = shutdown_rx.recv() => ClientEvent::Shutdown,
        };

        match event {
            ClientEvent::Inbound(Some(Ok(Message::Text(text)))) => {
                debug!("Message from {connection_id} ({} bytes)", text.len());
            }
            ClientEvent::Inbound(Some(Ok(Message::Close(_)))) | ClientEvent::Inbound(None) => {
                debug!("Client closed: {connection_id}");
                break;
            }
            ClientEvent::Inbound(Some(Ok(_))) => {}
            ClientEvent::Inbound(Some(Err(e))) => {
                warn!("WebSocket error for {connection_id}: {e}");
                break;
            }
            ClientEvent::Shutdown => {
                Connection::close(socket, CLOSE_GOING_AWAY, "server shutting down").await;
                return;
            }
        }
    }
}
