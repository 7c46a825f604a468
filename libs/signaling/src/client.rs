use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff as _;
use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex as SyncMutex, RwLock};
use secrecy::{ExposeSecret as _, SecretString};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::{Error, Result};
use crate::message::{Frame, OutboundMessage};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const OUTBOUND_CAPACITY: usize = 100;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

type FrameHandler = Arc<dyn Fn(Frame, CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;
type OnConnectHandler = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A durable, single-connection, auto-reconnecting control channel to the
/// cloud. See the component design for the full lifecycle contract.
#[derive(Clone)]
pub struct SignalingClient {
    inner: Arc<Inner>,
}

struct Inner {
    base_url: Url,
    local_host: String,
    local_port: u16,

    handlers: RwLock<HashMap<String, FrameHandler>>,
    on_connect: RwLock<Vec<OnConnectHandler>>,

    write_half: Mutex<Option<WsSink>>,
    current_conn_token: SyncMutex<CancellationToken>,

    outbound_tx: mpsc::Sender<OutboundMessage>,
    outbound_rx: SyncMutex<Option<mpsc::Receiver<OutboundMessage>>>,

    shutdown: CancellationToken,
}

impl SignalingClient {
    pub fn new(base_url: Url, local_host: impl Into<String>, local_port: u16) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                base_url,
                local_host: local_host.into(),
                local_port,
                handlers: RwLock::new(HashMap::new()),
                on_connect: RwLock::new(Vec::new()),
                write_half: Mutex::new(None),
                current_conn_token: SyncMutex::new(CancellationToken::new()),
                outbound_tx,
                outbound_rx: SyncMutex::new(Some(outbound_rx)),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Registers a handler for inbound frames of a given `type`. Later
    /// registrations for the same type replace the earlier one. The handler
    /// receives the connection's cancellation token, cancelled when that
    /// connection is torn down (reconnect or shutdown), so long-running
    /// handler work can observe it and stop.
    pub fn register_handler<F>(&self, type_: impl Into<String>, handler: F)
    where
        F: Fn(Frame, CancellationToken) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .write()
            .insert(type_.into(), Arc::new(handler));
    }

    /// Registers a handler invoked, in registration order, every time the
    /// connection is (re)established. Errors are logged, never fatal.
    pub fn add_on_connect<F>(&self, handler: F)
    where
        F: Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        self.inner.on_connect.write().push(Arc::new(handler));
    }

    /// A cloneable handle to the non-blocking outbound queue. Callers that
    /// only need fire-and-forget delivery should hang onto this rather than
    /// calling [`SignalingClient::send`].
    pub fn outbound_channel(&self) -> mpsc::Sender<OutboundMessage> {
        self.inner.outbound_tx.clone()
    }

    /// Stashes credentials and starts the connect/reconnect lifecycle.
    /// Returns immediately; initial connection failure does not propagate
    /// to the caller, it enters `reconnecting` instead.
    pub fn connect(&self, edge_id: String, api_key: SecretString) {
        let inner = self.inner.clone();

        if let Some(rx) = inner.outbound_rx.lock().take() {
            tokio::spawn(outbound_task(inner.clone(), rx));
        }

        tokio::spawn(lifecycle(inner, edge_id, api_key));
    }

    /// Cancels the lifecycle and closes any open socket. Does not wait for
    /// in-flight outbound work to flush.
    pub async fn close(&self) {
        self.inner.shutdown.cancel();
        self.inner.current_conn_token.lock().cancel();

        if let Some(mut sink) = self.inner.write_half.lock().await.take() {
            let _ = sink.close().await;
        }
    }

    /// Triggers a reconnect. Idempotent: concurrent callers collapse onto
    /// the single in-flight cancellation.
    pub fn reconnect(&self) {
        self.inner.current_conn_token.lock().cancel();
    }

    /// A synchronous write that fails immediately with [`Error::NotConnected`]
    /// if there is no open socket, rather than queueing.
    pub async fn send(
        &self,
        type_: impl Into<String>,
        from: Option<String>,
        to: Option<String>,
        data: serde_json::Value,
    ) -> Result<()> {
        let frame = Frame {
            type_: type_.into(),
            from,
            to,
            data,
        };
        let text = serde_json::to_string(&frame)?;

        let mut guard = self.inner.write_half.lock().await;
        let sink = guard.as_mut().ok_or(Error::NotConnected)?;
        sink.send(Message::Text(text.into())).await?;

        Ok(())
    }
}

async fn lifecycle(inner: Arc<Inner>, edge_id: String, api_key: SecretString) {
    let mut backoff = new_backoff();

    loop {
        if inner.shutdown.is_cancelled() {
            return;
        }

        let conn_token = CancellationToken::new();
        *inner.current_conn_token.lock() = conn_token.clone();

        match connect_once(&inner, &edge_id, &api_key, conn_token.clone()).await {
            Ok(()) => {
                backoff.reset();
                run_on_connect_handlers(&inner).await;

                tokio::select! {
                    () = conn_token.cancelled() => {}
                    () = inner.shutdown.cancelled() => {
                        if let Some(mut sink) = inner.write_half.lock().await.take() {
                            let _ = sink.close().await;
                        }
                        return;
                    }
                }
            }
            Err(error) => {
                tracing::warn!(%error, "signaling connect failed, backing off");
            }
        }

        *inner.write_half.lock().await = None;

        let delay = backoff.next_backoff().unwrap_or(Duration::from_secs(60));

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = inner.shutdown.cancelled() => return,
        }
    }
}

fn new_backoff() -> backoff::ExponentialBackoff {
    backoff::ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        max_interval: Duration::from_secs(60),
        multiplier: 2.0,
        max_elapsed_time: None,
        ..Default::default()
    }
}

async fn connect_once(
    inner: &Arc<Inner>,
    edge_id: &str,
    api_key: &SecretString,
    conn_token: CancellationToken,
) -> Result<()> {
    let url = crate::url::build(&inner.base_url, edge_id, &inner.local_host, inner.local_port);

    let mut request = url.as_str().into_client_request()?;
    let auth = format!("Bearer {}", api_key.expose_secret());
    request.headers_mut().insert(
        "Authorization",
        HeaderValue::from_str(&auth).map_err(|_| Error::NotConnected)?,
    );

    let stream = tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::connect_async(request))
        .await
        .map_err(|_| {
            Error::Transport(tokio_tungstenite::tungstenite::Error::Io(
                std::io::Error::new(std::io::ErrorKind::TimedOut, "handshake timed out"),
            ))
        })?
        .map_err(Error::Transport)?
        .0;

    let (write, read) = stream.split();
    *inner.write_half.lock().await = Some(write);

    tokio::spawn(reader_task(inner.clone(), read, conn_token.clone()));
    tokio::spawn(keepalive_task(inner.clone(), conn_token));

    Ok(())
}

async fn run_on_connect_handlers(inner: &Arc<Inner>) {
    let handlers = inner.on_connect.read().clone();

    for handler in handlers {
        if let Err(error) = handler().await {
            tracing::warn!(%error, "on-connect handler failed");
        }
    }
}

async fn reader_task(inner: Arc<Inner>, mut read: SplitStream<WsStream>, conn_token: CancellationToken) {
    loop {
        tokio::select! {
            () = conn_token.cancelled() => return,
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => dispatch(&inner, &text, conn_token.clone()),
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!("signaling socket closed by peer");
                        conn_token.cancel();
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::warn!(%error, "signaling read error");
                        conn_token.cancel();
                        return;
                    }
                }
            }
        }
    }
}

fn dispatch(inner: &Arc<Inner>, text: &str, conn_token: CancellationToken) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(error) => {
            tracing::warn!(%error, "dropping malformed signaling frame");
            return;
        }
    };

    let handler = inner.handlers.read().get(&frame.type_).cloned();

    match handler {
        Some(handler) => {
            tokio::spawn(handler(frame, conn_token));
        }
        None => tracing::debug!(type_ = %frame.type_, "dropping frame with no registered handler"),
    }
}

async fn keepalive_task(inner: Arc<Inner>, conn_token: CancellationToken) {
    let mut interval = tokio::time::interval(KEEPALIVE_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            () = conn_token.cancelled() => return,
            _ = interval.tick() => {
                let mut guard = inner.write_half.lock().await;
                if let Some(sink) = guard.as_mut()
                    && let Err(error) = sink.send(Message::Ping(Vec::new().into())).await
                {
                    tracing::warn!(%error, "keepalive ping failed");
                }
            }
        }
    }
}

async fn outbound_task(inner: Arc<Inner>, mut rx: mpsc::Receiver<OutboundMessage>) {
    while let Some(message) = rx.recv().await {
        let type_ = message.type_.clone();
        let frame = message.into_frame();

        let mut guard = inner.write_half.lock().await;
        let Some(sink) = guard.as_mut() else {
            tracing::warn!(type_ = %type_, "dropping outbound message: not connected");
            continue;
        };

        match serde_json::to_string(&frame) {
            Ok(text) => {
                if let Err(error) = sink.send(Message::Text(text.into())).await {
                    tracing::warn!(%error, type_ = %type_, "failed to write outbound message");
                }
            }
            Err(error) => tracing::warn!(%error, type_ = %type_, "failed to serialize outbound message"),
        }
    }
}
