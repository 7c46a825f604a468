mod api;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use catalog::{InMemoryCatalogStore, PortAllocator};
use clap::Parser;
use interfaces::InterfaceRegistry;
use secrecy::SecretString;
use service_manager::ServiceManager;
use signaling::SignalingClient;
use sync::SyncCoordinator;
use tunnel::Coordinator as TunnelCoordinator;
use url::Url;

const DEFAULT_TUNNEL_PORT_RANGE: std::ops::Range<u16> = 8000..9000;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::setup_global_subscriber(cli.log_level.directive(), tracing_subscriber::layer::Identity::default(), false)
        .context("failed to set up logging")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "edge agent starting");

    warn_if_missing_net_admin();

    let edge_id = resolve_edge_id(&cli).context("failed to resolve edge id")?;
    tracing::info!(%edge_id, "edge identity resolved");

    if let Some(db_path) = &cli.db_path {
        tracing::info!(path = %db_path, "db-path configured; the reference catalog store is in-memory, schema is a drop-in extension point");
    }

    let catalog: Arc<dyn catalog::CatalogStore> = Arc::new(InMemoryCatalogStore::new());
    let port_allocator = Arc::new(PortAllocator::new(DEFAULT_TUNNEL_PORT_RANGE));
    let interfaces = Arc::new(InterfaceRegistry::new());

    let server_addr = cli.server_addr;
    let signaling = SignalingClient::new(cli.cloud_url.clone(), server_addr.ip().to_string(), server_addr.port());

    let sync_coordinator = Arc::new(SyncCoordinator::install(signaling.clone(), catalog.clone()));

    let manager = ServiceManager::new(catalog.clone(), port_allocator, interfaces.clone(), Some(sync_coordinator));

    let tunnel_coordinator = TunnelCoordinator::new(edge_id.clone(), signaling.clone(), interfaces.clone());
    tunnel_coordinator.install().await;

    signaling.connect(edge_id.clone(), cli.api_key.clone());

    manager.start(server_addr.port()).await.context("failed to start service manager")?;

    let router = api::router(api::ApiState {
        catalog: catalog.clone(),
        manager: manager.clone(),
    });

    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("failed to bind local API on {server_addr}"))?;

    tracing::info!(%server_addr, "local HTTP API listening");

    tokio::select! {
        result = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()) => {
            if let Err(error) = result {
                tracing::error!(%error, "local HTTP API server exited unexpectedly");
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    manager.stop().await;
    signaling.close().await;

    tracing::info!("goodbye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let Ok(mut signal) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else {
            return;
        };
        signal.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// `EDGE_ID` wins if set; otherwise a persisted 16-character alphanumeric id
/// is generated on first run and reused on every subsequent start.
fn resolve_edge_id(cli: &Cli) -> Result<String> {
    if let Some(id) = &cli.edge_id {
        return Ok(id.clone());
    }

    bin_shared::edge_id::get_or_create(&bin_shared::edge_id::default_path())
}

#[cfg(target_os = "linux")]
fn warn_if_missing_net_admin() {
    let is_root = unsafe { libc::geteuid() } == 0;
    let has_net_admin = caps::has_cap(None, caps::CapSet::Effective, caps::Capability::CAP_NET_ADMIN).is_ok_and(|b| b);

    if !is_root && !has_net_admin {
        tracing::warn!(
            "running without root or CAP_NET_ADMIN; WireGuard TUN devices for peer tunnels will fail to come up until this is granted"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn warn_if_missing_net_admin() {}

#[derive(Parser, Debug)]
#[command(author, version, about = "Edge agent: publishes local services to the cloud and terminates peer tunnels", long_about = None)]
struct Cli {
    /// API key used to authenticate the signaling connection to the cloud.
    #[arg(long, env = "ARQUT_API_KEY")]
    api_key: SecretString,

    /// Base URL of the cloud control plane (scheme is rewritten to ws/wss for signaling).
    #[arg(long, env = "ARQUT_CLOUD_URL")]
    cloud_url: Url,

    /// Stable identifier for this edge. Auto-generated and persisted on first run if absent.
    #[arg(long, env = "EDGE_ID")]
    edge_id: Option<String>,

    /// Address the local HTTP API (and proxy upstream target for the bootstrap "Edge UI" service) binds to.
    #[arg(long, env = "SERVER_ADDR", default_value = ":3030", value_parser = parse_bind_addr)]
    server_addr: SocketAddr,

    /// Path to the persisted catalog database. The reference catalog store is in-memory;
    /// this is accepted for forward compatibility with a durable backing store.
    #[arg(long, env = "DB_PATH")]
    db_path: Option<String>,

    #[arg(long, env = "ARQUT_LOG_LEVEL", default_value = "info")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn directive(self) -> String {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
        .to_string()
    }
}

/// Parses `SERVER_ADDR` the way a Go `net.Listen` address string works:
/// a bare `:3030` means "all interfaces, port 3030".
fn parse_bind_addr(raw: &str) -> Result<SocketAddr, String> {
    if let Some(port) = raw.strip_prefix(':') {
        let port: u16 = port.parse().map_err(|_| format!("invalid port in `{raw}`"))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }

    raw.parse().map_err(|_| format!("invalid bind address `{raw}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_port_as_unspecified_host() {
        let addr = parse_bind_addr(":3030").unwrap();

        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 3030));
    }

    #[test]
    fn parses_full_socket_addr() {
        let addr = parse_bind_addr("127.0.0.1:3030").unwrap();

        assert_eq!(addr, SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 3030));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_bind_addr("not-an-addr").is_err());
    }
}
