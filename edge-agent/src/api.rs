//! Local HTTP API consumed by the UI: a thin CRUD wrapper over the
//! [`ServiceManager`], specified for completeness rather than as core scope.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, put};
use axum::{Json, Router};
use catalog::{CatalogStore, Protocol, ServiceUpdate};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use service_manager::ServiceManager;

#[derive(Clone)]
pub struct ApiState {
    pub catalog: Arc<dyn CatalogStore>,
    pub manager: Arc<ServiceManager>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/services", get(list_services).post(create_service))
        .route("/api/services/{id}", put(update_service).delete(delete_service))
        .route("/api/services/{id}/enable", patch(enable_service))
        .route("/api/services/{id}/disable", patch(disable_service))
        .route("/health", get(health))
        .with_state(state)
}

/// Wraps a successful payload in the `{success, data}` envelope.
fn ok(data: impl Serialize) -> Response {
    Json(json!({ "success": true, "data": data })).into_response()
}

async fn health() -> Response {
    Json(json!({"status": "healthy"})).into_response()
}

async fn list_services(State(state): State<ApiState>) -> Response {
    ok(state.catalog.list())
}

#[derive(Debug, Deserialize)]
struct CreateServiceRequest {
    name: String,
    protocol: String,
    local_host: String,
    local_port: u32,
}

async fn create_service(State(state): State<ApiState>, Json(body): Json<CreateServiceRequest>) -> Result<Response, service_manager::Error> {
    let protocol = Protocol::parse(&body.protocol).map_err(service_manager::Error::from)?;
    let service = state
        .manager
        .add_service(body.name, body.local_host, body.local_port, protocol)
        .await?;

    Ok((axum::http::StatusCode::CREATED, ok(service)).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct UpdateServiceRequest {
    name: Option<String>,
    protocol: Option<String>,
    local_host: Option<String>,
    local_port: Option<u32>,
    enabled: Option<bool>,
}

impl UpdateServiceRequest {
    fn into_update(self) -> Result<ServiceUpdate, service_manager::Error> {
        let protocol = self.protocol.map(|raw| Protocol::parse(&raw)).transpose().map_err(service_manager::Error::from)?;

        Ok(ServiceUpdate {
            name: self.name,
            local_host: self.local_host,
            local_port: self.local_port,
            protocol,
            enabled: self.enabled,
        })
    }
}

async fn update_service(State(state): State<ApiState>, Path(id): Path<String>, body: Option<Json<Value>>) -> Result<Response, service_manager::Error> {
    let request: UpdateServiceRequest = match body {
        Some(Json(value)) => serde_json::from_value(value).map_err(|error| service_manager::Error::Invalid(error.to_string()))?,
        None => UpdateServiceRequest::default(),
    };

    let service = state.manager.modify_service(&id, request.into_update()?).await?;

    Ok(ok(service))
}

async fn enable_service(State(state): State<ApiState>, Path(id): Path<String>) -> Result<Response, service_manager::Error> {
    let update = ServiceUpdate {
        enabled: Some(true),
        ..Default::default()
    };
    let service = state.manager.modify_service(&id, update).await?;

    Ok(ok(service))
}

async fn disable_service(State(state): State<ApiState>, Path(id): Path<String>) -> Result<Response, service_manager::Error> {
    let update = ServiceUpdate {
        enabled: Some(false),
        ..Default::default()
    };
    let service = state.manager.modify_service(&id, update).await?;

    Ok(ok(service))
}

async fn delete_service(State(state): State<ApiState>, Path(id): Path<String>) -> Result<Response, service_manager::Error> {
    let service = state.manager.delete_service(&id).await?;

    Ok(ok(service))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use catalog::{InMemoryCatalogStore, PortAllocator};
    use http::{Request, StatusCode};
    use interfaces::InterfaceRegistry;
    use tower::ServiceExt as _;

    use super::*;

    fn test_state() -> ApiState {
        let catalog: Arc<dyn CatalogStore> = Arc::new(InMemoryCatalogStore::new());
        let port_allocator = Arc::new(PortAllocator::new(8000..9000));
        let interfaces = Arc::new(InterfaceRegistry::new());
        let manager = ServiceManager::new(catalog.clone(), port_allocator, interfaces, None);

        ApiState { catalog, manager }
    }

    #[tokio::test]
    async fn health_returns_200() {
        let app = router(test_state());

        let response = app.oneshot(Request::get("/health").body(axum::body::Body::empty()).unwrap()).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_then_list_roundtrips() {
        let app = router(test_state());

        let body = json!({"name": "web", "protocol": "http", "local_host": "127.0.0.1", "local_port": 8080});
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/services")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app.oneshot(Request::get("/api/services").body(axum::body::Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_with_ws_alias_stores_websocket() {
        let state = test_state();
        let app = router(state.clone());

        let body = json!({"name": "chat", "protocol": "ws", "local_host": "127.0.0.1", "local_port": 9090});
        app.oneshot(
            Request::post("/api/services")
                .header("content-type", "application/json")
                .body(axum::body::Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

        let stored = state.catalog.list();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].protocol, catalog::Protocol::Websocket);
    }

    #[tokio::test]
    async fn delete_unknown_service_returns_404() {
        let app = router(test_state());

        let response = app
            .oneshot(Request::delete("/api/services/doesnotexist").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
