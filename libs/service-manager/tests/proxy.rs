#![allow(clippy::unwrap_used)]

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use catalog::{CatalogStore, InMemoryCatalogStore, PortAllocator, Protocol};
use interfaces::InterfaceRegistry;
use service_manager::ServiceManager;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn manager() -> (Arc<ServiceManager>, Arc<dyn CatalogStore>) {
    let catalog: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
    let port_allocator = Arc::new(PortAllocator::new(20000..21000));
    let interfaces = Arc::new(InterfaceRegistry::new());
    let manager = ServiceManager::new(catalog.clone(), port_allocator, interfaces, None);

    (manager, catalog)
}

async fn spawn_upstream(body: &'static str) -> u16 {
    let app = Router::new().route("/", get(move || async move { body }));
    let listener = tokio::net::TcpListener::bind((LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    port
}

#[tokio::test]
async fn forwards_to_upstream_and_returns_200() {
    let upstream_port = spawn_upstream("hello from upstream").await;

    let (manager, _catalog) = manager();
    manager.start(0).await.unwrap();

    let service = manager
        .add_service("web".to_string(), "127.0.0.1".to_string(), upstream_port as u32, Protocol::Http)
        .await
        .unwrap();

    manager.add_interface("lo0".to_string(), LOCALHOST).await;

    let bind_addr = format!("http://{LOCALHOST}:{}", service.tunnel_port);
    let response = reqwest::get(&bind_addr).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "hello from upstream");

    manager.stop().await;
}

#[tokio::test]
async fn returns_502_when_upstream_is_down() {
    let (manager, _catalog) = manager();
    manager.start(0).await.unwrap();

    // Nothing is listening on this port.
    let dead_port = 39999u32;

    let service = manager
        .add_service("dead".to_string(), "127.0.0.1".to_string(), dead_port, Protocol::Http)
        .await
        .unwrap();

    manager.add_interface("lo1".to_string(), LOCALHOST).await;

    let bind_addr = format!("http://{LOCALHOST}:{}", service.tunnel_port);
    let response = reqwest::get(&bind_addr).await.unwrap();

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);

    manager.stop().await;
}

#[tokio::test]
async fn listener_starts_within_a_second_of_interface_becoming_available() {
    let upstream_port = spawn_upstream("ok").await;

    let (manager, _catalog) = manager();
    manager.start(0).await.unwrap();

    let service = manager
        .add_service("late".to_string(), "127.0.0.1".to_string(), upstream_port as u32, Protocol::Http)
        .await
        .unwrap();

    // Interface doesn't exist yet: no listener bound, connection should fail.
    let bind_addr = format!("http://{LOCALHOST}:{}", service.tunnel_port);
    assert!(reqwest::get(&bind_addr).await.is_err());

    manager.add_interface("lo2".to_string(), LOCALHOST).await;

    let result = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Ok(response) = reqwest::get(&bind_addr).await {
                if response.status() == reqwest::StatusCode::OK {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    assert!(result.is_ok(), "listener did not come up within the expected window");

    manager.stop().await;
}

#[tokio::test]
async fn removing_an_ipv6_interface_stops_its_listener() {
    let upstream_port = spawn_upstream("v6").await;

    let (manager, _catalog) = manager();
    manager.start(0).await.unwrap();

    let service = manager
        .add_service("v6".to_string(), "127.0.0.1".to_string(), upstream_port as u32, Protocol::Http)
        .await
        .unwrap();

    let v6 = IpAddr::V6(Ipv6Addr::LOCALHOST);
    manager.add_interface("lo6".to_string(), v6).await;

    let bind_addr = format!("http://[{v6}]:{}", service.tunnel_port);
    let response = reqwest::get(&bind_addr).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    manager.remove_interface("lo6").await;

    let result = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if reqwest::get(&bind_addr).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    assert!(result.is_ok(), "listener for the removed ipv6 interface is still accepting connections");

    manager.stop().await;
}
