//! Per-listener reverse proxy: a single upstream `(local_host, local_port)`,
//! HTTP requests forwarded through a shared `hyper_util` legacy client,
//! WebSocket upgrades bridged message-by-message to a fresh upstream
//! connection dialed with `tokio-tungstenite`.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderName, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame as TtCloseFrame;
use tokio_tungstenite::tungstenite::Message as TtMessage;

const READ_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const UPSTREAM_WS_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const HOP_BY_HOP_HEADERS: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

#[derive(Debug, Clone)]
pub struct ProxyTarget {
    pub local_host: String,
    pub local_port: u16,
}

#[derive(Clone)]
struct ProxyState {
    target: ProxyTarget,
    http_client: HyperClient<HttpConnector, Body>,
}

/// Builds a single-upstream reverse proxy router. Every request, regardless
/// of path, is forwarded to `target`.
pub fn app(target: ProxyTarget) -> Router {
    let state = ProxyState {
        target,
        http_client: HyperClient::builder(TokioExecutor::new()).build_http(),
    };

    Router::new().fallback(proxy_handler).with_state(state)
}

fn is_ws_upgrade(req: &axum::http::Request<Body>) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"))
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    req: axum::http::Request<Body>,
) -> Response {
    if is_ws_upgrade(&req) {
        return upgrade_websocket(state, req).await;
    }

    forward_http(&state, client_addr, req).await
}

async fn upgrade_websocket(state: ProxyState, req: axum::http::Request<Body>) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let protocols: Vec<String> = req
        .headers()
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(',').map(|s| s.trim().to_string()))
        .collect();

    let upgrade = match WebSocketUpgrade::from_request(req, &state).await {
        Ok(upgrade) => upgrade,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    let mut upgrade = upgrade;
    for protocol in protocols.iter().cloned() {
        upgrade = upgrade.protocols([protocol]);
    }

    let target = state.target;
    upgrade
        .on_upgrade(move |client_ws| bridge_websocket(client_ws, target, path_and_query, protocols))
        .into_response()
}

async fn forward_http(state: &ProxyState, client_addr: SocketAddr, req: axum::http::Request<Body>) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let Ok(target_uri) = format!(
        "http://{}:{}{}",
        state.target.local_host, state.target.local_port, path_and_query
    )
    .parse::<Uri>() else {
        return StatusCode::BAD_GATEWAY.into_response();
    };

    let (mut parts, body) = req.into_parts();
    parts.uri = target_uri;

    for name in HOP_BY_HOP_HEADERS {
        parts.headers.remove(name);
    }

    if let Ok(host) = HeaderValue::from_str(&format!("{}:{}", state.target.local_host, state.target.local_port)) {
        parts.headers.insert(header::HOST, host);
    }

    if !parts.headers.contains_key("x-forwarded-proto") {
        parts
            .headers
            .insert("x-forwarded-proto", HeaderValue::from_static("http"));
    }
    if !parts.headers.contains_key("x-forwarded-for")
        && let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string())
    {
        parts.headers.insert("x-forwarded-for", value);
    }

    let proxy_req = axum::http::Request::from_parts(parts, body);

    match tokio::time::timeout(READ_WRITE_TIMEOUT, state.http_client.request(proxy_req)).await {
        Ok(Ok(resp)) => {
            let (parts, body) = resp.into_parts();
            Response::from_parts(parts, Body::new(body)).into_response()
        }
        Ok(Err(error)) => {
            tracing::warn!(%error, "upstream request failed");
            StatusCode::BAD_GATEWAY.into_response()
        }
        Err(_) => {
            tracing::warn!("upstream request timed out");
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

async fn bridge_websocket(client_ws: WebSocket, target: ProxyTarget, path_and_query: String, protocols: Vec<String>) {
    let url = format!("ws://{}:{}{}", target.local_host, target.local_port, path_and_query);

    let mut request = match url.into_client_request() {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(%error, "failed to build upstream websocket request");
            return;
        }
    };

    if !protocols.is_empty()
        && let Ok(value) = protocols.join(", ").parse()
    {
        request.headers_mut().insert("Sec-WebSocket-Protocol", value);
    }

    let upstream = match tokio::time::timeout(UPSTREAM_WS_CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request)).await {
        Ok(Ok((stream, _))) => stream,
        Ok(Err(error)) => {
            tracing::warn!(%error, "upstream websocket connect failed");
            return;
        }
        Err(_) => {
            tracing::warn!("upstream websocket connect timed out");
            return;
        }
    };

    let (mut upstream_write, mut upstream_read) = upstream.split();
    let (mut client_write, mut client_read) = client_ws.split();

    let client_to_upstream = async {
        while let Some(Ok(message)) = client_read.next().await {
            if upstream_write.send(to_tungstenite_message(message)).await.is_err() {
                break;
            }
        }
    };

    let upstream_to_client = async {
        while let Some(Ok(message)) = upstream_read.next().await {
            if client_write.send(to_axum_message(message)).await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        () = client_to_upstream => {}
        () = upstream_to_client => {}
    }
}

fn to_tungstenite_message(message: AxumMessage) -> TtMessage {
    match message {
        AxumMessage::Text(text) => TtMessage::Text(text.to_string().into()),
        AxumMessage::Binary(data) => TtMessage::Binary(data.to_vec().into()),
        AxumMessage::Ping(data) => TtMessage::Ping(data.to_vec().into()),
        AxumMessage::Pong(data) => TtMessage::Pong(data.to_vec().into()),
        AxumMessage::Close(frame) => TtMessage::Close(frame.map(|f| TtCloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        })),
    }
}

fn to_axum_message(message: TtMessage) -> AxumMessage {
    match message {
        TtMessage::Text(text) => AxumMessage::Text(text.to_string().into()),
        TtMessage::Binary(data) => AxumMessage::Binary(data.to_vec().into()),
        TtMessage::Ping(data) => AxumMessage::Ping(data.to_vec().into()),
        TtMessage::Pong(data) => AxumMessage::Pong(data.to_vec().into()),
        TtMessage::Close(frame) => AxumMessage::Close(frame.map(|f| AxumCloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        })),
        TtMessage::Frame(_) => AxumMessage::Ping(Vec::new().into()),
    }
}
