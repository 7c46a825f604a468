use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::routing::get;
use catalog::{CatalogStore, NewService, PortAllocator, Protocol, Service, ServiceUpdate};
use interfaces::{InterfaceEvent, InterfaceRegistry};
use parking_lot::RwLock;
use serde_json::json;
use sync::{SyncCoordinator, SyncOperation};
use tokio::sync::Mutex as AsyncMutex;

use crate::error::{Error, Result};
use crate::listener::Listener;
use crate::proxy::{self, ProxyTarget};

const PING_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 3031);
const STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagerState {
    Idle,
    Running,
    Stopping,
}

/// Runs the cross-product of (enabled services) x (registered interfaces)
/// as a fleet of reverse-proxy listeners, reconciled incrementally on every
/// catalog or interface mutation.
pub struct ServiceManager {
    catalog: Arc<dyn CatalogStore>,
    port_allocator: Arc<PortAllocator>,
    interfaces: Arc<InterfaceRegistry>,
    sync: Option<Arc<SyncCoordinator>>,

    state: RwLock<ManagerState>,
    known_interfaces: RwLock<HashMap<String, IpAddr>>,
    listeners: AsyncMutex<HashMap<(String, IpAddr), Listener>>,
    ping: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
    interface_events: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ServiceManager {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        port_allocator: Arc<PortAllocator>,
        interfaces: Arc<InterfaceRegistry>,
        sync: Option<Arc<SyncCoordinator>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            port_allocator,
            interfaces,
            sync,
            state: RwLock::new(ManagerState::Idle),
            known_interfaces: RwLock::new(HashMap::new()),
            listeners: AsyncMutex::new(HashMap::new()),
            ping: AsyncMutex::new(None),
            interface_events: AsyncMutex::new(None),
        })
    }

    /// Bootstraps the edge UI's own service row if the catalog is empty,
    /// starts the ping endpoint, subscribes to the interface registry, and
    /// starts one listener per (enabled service, registered interface).
    pub async fn start(self: &Arc<Self>, own_api_port: u16) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ManagerState::Idle {
                return Err(Error::AlreadyStarted);
            }
            *state = ManagerState::Running;
        }

        if self.catalog.count() == 0 {
            let edge_ui = catalog::default_edge_ui_service(own_api_port);
            let tunnel_port = self.port_allocator.allocate(&self.catalog.used_tunnel_ports()).await?;
            let created = self.catalog.add(edge_ui, tunnel_port)?;
            self.notify_sync(SyncOperation::Created, &created);
        }

        *self.ping.lock().await = Some(tokio::spawn(serve_ping()));
        *self.interface_events.lock().await = Some(tokio::spawn(watch_interfaces(self.clone())));

        for (name, ip) in self.interfaces.snapshot() {
            self.known_interfaces.write().insert(name, ip);
        }

        for service in self.catalog.list().into_iter().filter(|s| s.enabled) {
            self.start_listeners_for_service(&service).await;
        }

        Ok(())
    }

    /// Cancels every listener and the ping endpoint, bounded by
    /// [`STOP_TIMEOUT`]; stragglers are force-aborted.
    pub async fn stop(self: &Arc<Self>) {
        *self.state.write() = ManagerState::Stopping;

        if let Some(handle) = self.ping.lock().await.take() {
            handle.abort();
        }
        if let Some(handle) = self.interface_events.lock().await.take() {
            handle.abort();
        }

        let listeners: Vec<Listener> = self.listeners.lock().await.drain().map(|(_, l)| l).collect();
        let shutdowns = listeners.into_iter().map(Listener::shutdown);

        if tokio::time::timeout(STOP_TIMEOUT, futures::future::join_all(shutdowns))
            .await
            .is_err()
        {
            tracing::warn!("service manager stop exceeded grace window, stragglers may still be closing");
        }

        *self.state.write() = ManagerState::Idle;
    }

    pub async fn add_service(
        self: &Arc<Self>,
        name: String,
        local_host: String,
        local_port: u32,
        protocol: Protocol,
    ) -> Result<Service> {
        let tunnel_port = self.port_allocator.allocate(&self.catalog.used_tunnel_ports()).await?;
        let service = self.catalog.add(
            NewService {
                name,
                protocol,
                local_host,
                local_port,
            },
            tunnel_port,
        )?;

        if self.is_running() {
            self.start_listeners_for_service(&service).await;
        }

        self.notify_sync(SyncOperation::Created, &service);
        Ok(service)
    }

    pub async fn modify_service(self: &Arc<Self>, id: &str, update: ServiceUpdate) -> Result<Service> {
        let restart = update.requires_restart();
        let enabled_change = update.enabled;
        let service = self.catalog.update(id, update)?;

        if restart {
            self.stop_listeners_for_service(id).await;
            if self.is_running() && service.enabled {
                self.start_listeners_for_service(&service).await;
            }
        }

        let operation = match enabled_change {
            Some(true) => SyncOperation::Enabled,
            Some(false) => SyncOperation::Disabled,
            None => SyncOperation::Updated,
        };
        self.notify_sync(operation, &service);

        Ok(service)
    }

    pub async fn delete_service(self: &Arc<Self>, id: &str) -> Result<Service> {
        self.stop_listeners_for_service(id).await;
        let service = self.catalog.delete(id)?;
        self.notify_sync(SyncOperation::Deleted, &service);
        Ok(service)
    }

    /// Replaces the interface registry wholesale; diffs are applied against
    /// the manager's local mirror so only changed interfaces start/stop
    /// listeners.
    pub async fn set_interface_ips(self: &Arc<Self>, desired: HashMap<String, IpAddr>) {
        self.interfaces.set_all(desired);
    }

    pub async fn add_interface(self: &Arc<Self>, name: String, ip: IpAddr) {
        let previous = self.known_interfaces.write().insert(name.clone(), ip);
        if previous == Some(ip) {
            return;
        }

        self.interfaces.add(name, ip);

        if !self.is_running() {
            return;
        }

        for service in self.catalog.list().into_iter().filter(|s| s.enabled) {
            self.start_listener(&service, ip).await;
        }
    }

    pub async fn remove_interface(self: &Arc<Self>, name: &str) {
        let Some(ip) = self.known_interfaces.write().remove(name) else {
            return;
        };
        self.interfaces.remove(name);

        let mut listeners = self.listeners.lock().await;
        let keys: Vec<(String, IpAddr)> = listeners.keys().filter(|(_, listener_ip)| *listener_ip == ip).cloned().collect();
        for key in keys {
            if let Some(listener) = listeners.remove(&key) {
                listener.shutdown().await;
            }
        }
    }

    /// Stops every listener, emits a batch `remove` sync, then empties the
    /// catalog.
    pub async fn clear(self: &Arc<Self>) {
        let listeners: Vec<Listener> = self.listeners.lock().await.drain().map(|(_, l)| l).collect();
        futures::future::join_all(listeners.into_iter().map(Listener::shutdown)).await;

        let drained = self.catalog.clear();
        if let Some(sync) = &self.sync {
            sync.notify_clear(drained);
        }
    }

    fn is_running(&self) -> bool {
        *self.state.read() == ManagerState::Running
    }

    fn notify_sync(&self, operation: SyncOperation, service: &Service) {
        if let Some(sync) = &self.sync {
            sync.notify(operation, service);
        }
    }

    async fn start_listeners_for_service(self: &Arc<Self>, service: &Service) {
        let interfaces: Vec<(String, IpAddr)> = self.known_interfaces.read().iter().map(|(n, ip)| (n.clone(), *ip)).collect();
        for (_, ip) in interfaces {
            self.start_listener(service, ip).await;
        }
    }

    async fn stop_listeners_for_service(self: &Arc<Self>, service_id: &str) {
        let mut listeners = self.listeners.lock().await;
        let keys: Vec<(String, IpAddr)> = listeners.keys().filter(|(id, _)| id == service_id).cloned().collect();
        for key in keys {
            if let Some(listener) = listeners.remove(&key) {
                listener.shutdown().await;
            }
        }
    }

    async fn start_listener(self: &Arc<Self>, service: &Service, ip: IpAddr) {
        let bind_addr = SocketAddr::new(ip, service.tunnel_port);
        let key = (service.id.clone(), ip);

        let mut listeners = self.listeners.lock().await;
        if listeners.contains_key(&key) {
            return;
        }

        let app = proxy::app(ProxyTarget {
            local_host: service.local_host.clone(),
            local_port: service.local_port,
        });

        match Listener::bind(bind_addr, app).await {
            Ok(listener) => {
                listeners.insert(key, listener);
            }
            Err(error) => {
                tracing::warn!(%error, %bind_addr, service = %service.id, "failed to bind listener");
            }
        }
    }
}

async fn watch_interfaces(manager: Arc<ServiceManager>) {
    let mut events = manager.interfaces.subscribe();

    loop {
        match events.recv().await {
            Ok(InterfaceEvent::Added { name, ip }) => manager.add_interface(name, ip).await,
            Ok(InterfaceEvent::Removed { name }) => manager.remove_interface(&name).await,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "interface event stream lagged, snapshot may be stale");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn serve_ping() {
    let router = axum::Router::new().route("/", get(|| async { Json(json!({"status": "pong"})) }));

    match tokio::net::TcpListener::bind(PING_ADDR).await {
        Ok(listener) => {
            if let Err(error) = axum::serve(listener, router).await {
                tracing::warn!(%error, "ping endpoint exited");
            }
        }
        Err(error) => tracing::warn!(%error, %PING_ADDR, "ping endpoint bind failed, continuing without it"),
    }
}
