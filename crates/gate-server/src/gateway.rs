//! WebSocketGateway: wires the interceptor and binder to the transport and
//! owns the correlation table's lifecycle.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocket;
use gate_protocol::{GateResult, RouteDescriptor};
use gate_transport::{
    HandshakeCompletion, TransportConfig, TransportServer, UpgradeHooks, UpgradeRequest,
};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::authorizer::Authorizer;
use crate::binder::ConnectionBinder;
use crate::correlation::CorrelationTable;
use crate::interceptor::HandshakeInterceptor;
use crate::registry::Registry;

/// Correlation-table policy.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// How long a pending handshake may stay unbound, in ms (default: 10000)
    pub handshake_timeout_ms: u64,
    /// How often expired entries are purged, in ms (default: 5000)
    pub sweep_interval_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: 10_000,
            sweep_interval_ms: 5_000,
        }
    }
}

/// The two transport hooks, sharing one correlation table.
pub struct GatewayHooks<A: Authorizer, R: Registry> {
    interceptor: HandshakeInterceptor<A>,
    binder: ConnectionBinder<R>,
}

impl<A: Authorizer, R: Registry> GatewayHooks<A, R> {
    pub fn new(authorizer: Arc<A>, registry: Arc<R>, table: Arc<CorrelationTable>) -> Self {
        Self {
            interceptor: HandshakeInterceptor::new(authorizer, table.clone()),
            binder: ConnectionBinder::new(registry, table),
        }
    }
}

impl<A, R> UpgradeHooks for GatewayHooks<A, R>
where
    A: Authorizer,
    R: Registry<Connection = WebSocket>,
{
    fn verify_handshake(
        &self,
        request: Arc<UpgradeRequest>,
        completion: HandshakeCompletion,
    ) -> impl Future<Output = ()> + Send {
        async move {
            self.interceptor.verify(&request, completion).await;
        }
    }

    fn connection_established(
        &self,
        connection: WebSocket,
        request: Arc<UpgradeRequest>,
    ) -> impl Future<Output = ()> + Send {
        async move {
            self.binder.bind(connection, &request).await;
        }
    }
}

/// State held only while the listener runs.
struct Running {
    transport: TransportServer,
    table: Arc<CorrelationTable>,
    sweeper: JoinHandle<()>,
}

/// Accepts upgrades on a listener, gates them through an [`Authorizer`], and
/// hands approved connections to a [`Registry`].
///
/// The correlation table is created at `start` and cleared at `stop`.
pub struct WebSocketGateway<A: Authorizer, R: Registry> {
    authorizer: Arc<A>,
    registry: Arc<R>,
    config: GatewayConfig,
    running: Option<Running>,
}

impl<A, R> WebSocketGateway<A, R>
where
    A: Authorizer,
    R: Registry<Connection = WebSocket>,
{
    pub fn new(authorizer: A, registry: Arc<R>, config: GatewayConfig) -> Self {
        Self {
            authorizer: Arc::new(authorizer),
            registry,
            config,
            running: None,
        }
    }

    /// Bind the listener and begin accepting upgrades.
    pub async fn start(&mut self, transport_config: TransportConfig) -> GateResult<()> {
        if self.running.is_some() {
            warn!("WebSocket gateway already running");
            return Ok(());
        }

        let table = Arc::new(CorrelationTable::new(Duration::from_millis(
            self.config.handshake_timeout_ms,
        )));
        let hooks = Arc::new(GatewayHooks::new(
            self.authorizer.clone(),
            self.registry.clone(),
            table.clone(),
        ));

        let transport = TransportServer::start(transport_config, hooks).await?;
        let sweeper = spawn_sweeper(
            table.clone(),
            Duration::from_millis(self.config.sweep_interval_ms.max(1)),
        );

        info!(
            "WebSocket gateway listening on {}://{}",
            transport.scheme(),
            transport.local_addr()
        );

        self.running = Some(Running {
            transport,
            table,
            sweeper,
        });
        Ok(())
    }

    /// Stop accepting upgrades and drop all pending correlation state.
    pub async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.transport.stop().await;
        running.sweeper.abort();
        running.table.clear();
        info!("WebSocket gateway stopped");
    }

    /// Register a route with the registry.
    pub fn add_route(&self, route_key: &str, descriptor: RouteDescriptor) {
        self.registry.add_route(route_key, descriptor);
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bound port while running.
    pub fn port(&self) -> Option<u16> {
        self.running.as_ref().map(|r| r.transport.port())
    }

    /// Handshakes verified or in verification but not yet bound.
    pub fn pending_handshakes(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.table.len())
    }
}

fn spawn_sweeper(table: Arc<CorrelationTable>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = table.purge_expired();
            if purged > 0 {
                debug!("Purged {purged} expired handshake(s)");
            }
        }
    })
}
