//! WebSocket transport server using Axum.
//!
//! Accepts HTTP upgrade requests, asks the registered [`UpgradeHooks`] to
//! verify each one, and either refuses it with an HTTP response or completes
//! the upgrade and hands the socket back to the hooks.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::rejection::WebSocketUpgradeRejection,
    },
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Json, Response},
    routing::get,
};
use axum_server::tls_rustls::RustlsConfig;
use gate_protocol::{
    GateError, GateResult, HandshakeOutcome, Rejection,
    error::STATUS_BAD_REQUEST,
};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::hooks::{HandshakeCompletion, UpgradeHooks};
use crate::request::UpgradeRequest;

/// Transport server configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Path that accepts upgrade requests
    pub path: String,
    /// TLS material (serves wss:// when set)
    pub tls: Option<TlsConfig>,
    /// Enable CORS
    pub enable_cors: bool,
    /// Enable verbose connection logging
    pub verbose_logging: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            hostname: "127.0.0.1".into(),
            path: "/".into(),
            tls: None,
            enable_cors: false,
            verbose_logging: false,
        }
    }
}

impl TransportConfig {
    pub fn scheme(&self) -> &'static str {
        if self.tls.is_some() { "wss" } else { "ws" }
    }
}

/// PEM certificate and key paths.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Shared state for the transport server.
struct AppState<H: UpgradeHooks> {
    hooks: Arc<H>,
    config: TransportConfig,
    /// Handshakes whose verification has not finished yet
    pending: Arc<AtomicUsize>,
}

/// The transport server: owns the listener task.
pub struct TransportServer {
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound address
    local_addr: SocketAddr,
    scheme: &'static str,
}

impl TransportServer {
    /// Bind the listener and start serving upgrades through `hooks`.
    pub async fn start<H: UpgradeHooks>(config: TransportConfig, hooks: Arc<H>) -> GateResult<Self> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let state = Arc::new(AppState {
            hooks,
            config: config.clone(),
            pending: Arc::new(AtomicUsize::new(0)),
        });

        if !config.path.starts_with('/') || config.path == "/health" {
            return Err(GateError::InvalidPath(config.path.clone()));
        }

        let mut app = Router::new()
            .route(&config.path, get(ws_upgrade_handler::<H>))
            .route("/health", get(health_handler::<H>))
            .with_state(state);
        if config.enable_cors {
            app = app.layer(CorsLayer::permissive());
        }

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port)
            .parse()
            .map_err(|_| GateError::InvalidAddress(format!("{}:{}", config.hostname, config.port)))?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let service = app.into_make_service_with_connect_info::<SocketAddr>();

        let handle = match &config.tls {
            None => tokio::spawn(async move {
                let result = axum::serve(listener, service)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown_rx.recv().await;
                    })
                    .await;
                if let Err(e) = result {
                    error!("Transport server error: {e}");
                }
            }),
            Some(tls) => {
                let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                    .await
                    .map_err(GateError::Tls)?;
                let server_handle = axum_server::Handle::new();
                let server = axum_server::tls_rustls::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(server_handle.clone());
                tokio::spawn(async move {
                    let _ = shutdown_rx.recv().await;
                    server_handle.graceful_shutdown(Some(Duration::from_secs(1)));
                });
                tokio::spawn(async move {
                    if let Err(e) = server.serve(service).await {
                        error!("Transport server error: {e}");
                    }
                })
            }
        };

        info!("Transport bound to {}://{}{}", config.scheme(), local_addr, config.path);

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            local_addr,
            scheme: config.scheme(),
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws` or `wss`.
    pub fn scheme(&self) -> &'static str {
        self.scheme
    }

    /// Gracefully stop the server.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Transport server stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler<H: UpgradeHooks>(
    State(state): State<Arc<AppState<H>>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // A missing key still reaches the verifier so it can refuse the request
    // itself; every other malformed upgrade is refused here.
    let ws = match ws {
        Ok(ws) => Some(ws),
        Err(WebSocketUpgradeRejection::WebSocketKeyHeaderMissing(_)) => None,
        Err(rejection) => {
            debug!("Not a WebSocket upgrade from {remote_addr}: {rejection}");
            return rejection.into_response();
        }
    };

    let request = Arc::new(UpgradeRequest::new(method, uri, headers).with_remote_addr(remote_addr));
    if state.config.verbose_logging {
        debug!("Upgrade request from {remote_addr} for {}", request.uri);
    }

    // Verification runs as its own task so it finishes even if the client
    // disconnects while we wait on it.
    let (completion, outcome_rx) = HandshakeCompletion::channel();
    let hooks = state.hooks.clone();
    let pending = state.pending.clone();
    let verify_request = request.clone();
    pending.fetch_add(1, Ordering::Relaxed);
    tokio::spawn(async move {
        hooks.verify_handshake(verify_request, completion).await;
        pending.fetch_sub(1, Ordering::Relaxed);
    });

    let outcome = outcome_rx.await.unwrap_or_else(|_| {
        warn!("Handshake verifier finished without a decision; refusing {remote_addr}");
        HandshakeOutcome::Reject(Rejection::bare())
    });

    match (outcome, ws) {
        (HandshakeOutcome::Accept, Some(ws)) => {
            let hooks = state.hooks.clone();
            ws.on_failed_upgrade(move |e| warn!("Upgrade failed for {remote_addr}: {e}"))
                .on_upgrade(move |socket| async move {
                    hooks.connection_established(socket, request).await;
                })
        }
        (HandshakeOutcome::Accept, None) => {
            error!("Verifier accepted an upgrade without Sec-WebSocket-Key from {remote_addr}");
            rejection_response(Rejection::new(STATUS_BAD_REQUEST, "Missing Sec-WebSocket-Key header"))
        }
        (HandshakeOutcome::Reject(rejection), _) => rejection_response(rejection),
    }
}

async fn health_handler<H: UpgradeHooks>(
    State(state): State<Arc<AppState<H>>>,
) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "pendingHandshakes": state.pending.load(Ordering::Relaxed),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Render a refusal. Missing status defaults to 401; missing message
/// defaults to the status's reason phrase.
fn rejection_response(rejection: Rejection) -> Response {
    let status = rejection
        .status
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::UNAUTHORIZED);
    let body = rejection
        .message
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unauthorized").to_string());

    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
    for (name, value) in &rejection.headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!("Skipping invalid rejection header: {name}"),
        }
    }
    response
}
