//! Upgrade Gate: WebSocket handshake gate
//!
//! Accepts WebSocket upgrades, checks each against a shared-secret
//! authorizer, and registers approved connections under a server-assigned
//! identifier.
//!
//! Usage:
//!   upgrade-gate                                 # Default port 3001, random token
//!   upgrade-gate --port 8080                     # Custom port
//!   upgrade-gate --token mysecret                # Fixed auth token
//!   upgrade-gate --route '$default=echo'         # Register a route

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use gate_protocol::RouteDescriptor;
use gate_server::{AuthConfig, ConnectionRegistry, GatewayConfig, TokenAuthorizer, WebSocketGateway};
use gate_transport::{TlsConfig, TransportConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "upgrade-gate", about = "Upgrade Gate: authorizing WebSocket handshake gate")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "3001")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Path that accepts WebSocket upgrades
    #[arg(long, default_value = "/")]
    path: String,

    /// Authentication token (random if not provided)
    #[arg(long)]
    token: Option<String>,

    /// Only accept the token via `Authorization: Bearer`, not `?token=`
    #[arg(long)]
    no_legacy_auth: bool,

    /// How long a verified handshake may wait for its connection (ms)
    #[arg(long, default_value = "10000")]
    handshake_timeout_ms: u64,

    /// How often stale handshakes are purged (ms)
    #[arg(long, default_value = "5000")]
    sweep_interval_ms: u64,

    /// Path to TLS certificate (PEM)
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,

    /// Path to TLS private key (PEM)
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,

    /// Allow cross-origin requests
    #[arg(long)]
    cors: bool,

    /// Route to register, as ROUTE=HANDLER (repeatable)
    #[arg(long = "route", value_name = "ROUTE=HANDLER")]
    routes: Vec<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn generate_token() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::rng().random();
    hex::encode(bytes)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli).await {
        error!("Fatal: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let token_was_explicit = cli.token.is_some();
    let token = cli.token.unwrap_or_else(generate_token);

    let tls = match (cli.tls_cert, cli.tls_key) {
        (Some(cert_path), Some(key_path)) => Some(TlsConfig { cert_path, key_path }),
        _ => None,
    };

    let transport_config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname,
        path: cli.path,
        tls,
        enable_cors: cli.cors,
        verbose_logging: cli.verbose,
    };

    let authorizer = TokenAuthorizer::new(AuthConfig {
        token: Some(token.clone()),
        allow_query_token: !cli.no_legacy_auth,
    });
    let registry = Arc::new(ConnectionRegistry::new());
    let mut gateway = WebSocketGateway::new(
        authorizer,
        registry.clone(),
        GatewayConfig {
            handshake_timeout_ms: cli.handshake_timeout_ms,
            sweep_interval_ms: cli.sweep_interval_ms,
        },
    );

    for pair in &cli.routes {
        match RouteDescriptor::parse_pair(pair) {
            Some(descriptor) => {
                let route_key = descriptor.route.clone();
                gateway.add_route(&route_key, descriptor);
            }
            None => warn!("Ignoring malformed --route {pair:?} (expected ROUTE=HANDLER)"),
        }
    }

    gateway.start(transport_config).await?;

    println!();
    println!("  Upgrade Gate");
    println!("  Port:       {}", gateway.port().unwrap_or_default());
    if token_was_explicit {
        println!("  Token:      (from --token)");
    } else {
        println!("  Token:      {token}");
    }
    println!("  Routes:     {}", registry.routes().len());
    println!();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    gateway.stop().await;
    registry.shutdown_all().await;
    Ok(())
}
