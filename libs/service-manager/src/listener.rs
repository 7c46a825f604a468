//! A single bound listener: accept loop plus per-connection serving with an
//! idle timeout and a bounded graceful-shutdown window.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as _;

const IDLE_TIMEOUT: Duration = Duration::from_secs(120);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A running reverse-proxy listener on one `(service, interface)` pair.
pub struct Listener {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, app: Router) -> std::io::Result<Self> {
        let tcp = TcpListener::bind(addr).await?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(accept_loop(tcp, app, cancel.clone()));

        Ok(Self { cancel, task })
    }

    /// Stops accepting new connections and gives in-flight ones
    /// [`SHUTDOWN_GRACE`] to finish before force-aborting the accept task.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();

        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.task).await.is_err() {
            tracing::warn!("listener did not drain within grace window, force-closing");
            self.task.abort();
        }
    }
}

async fn accept_loop(tcp: TcpListener, app: Router, cancel: CancellationToken) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = tcp.accept() => {
                match accepted {
                    Ok((socket, peer)) => {
                        connections.spawn(serve_connection(socket, peer, app.clone(), cancel.clone()));
                    }
                    Err(error) => tracing::warn!(%error, "accept failed"),
                }
            }
        }
    }

    connections.shutdown().await;
}

async fn serve_connection(socket: TcpStream, peer: SocketAddr, app: Router, cancel: CancellationToken) {
    let io = TokioIo::new(socket);
    let service = hyper::service::service_fn(move |req: axum::http::Request<hyper::body::Incoming>| {
        let app = app.clone();
        let mut req = req.map(Body::new);
        req.extensions_mut().insert(ConnectInfo(peer));
        async move {
            match app.oneshot(req).await {
                Ok(response) => Ok::<_, std::convert::Infallible>(response),
                Err(never) => match never {},
            }
        }
    });

    let conn = ConnBuilder::new(TokioExecutor::new()).serve_connection_with_upgrades(io, service);
    let mut conn = std::pin::pin!(conn);

    tokio::select! {
        result = &mut conn => {
            if let Err(error) = result {
                tracing::debug!(%error, "connection closed with error");
            }
        }
        () = tokio::time::sleep(IDLE_TIMEOUT) => {
            tracing::debug!("connection idle timeout, closing");
        }
        () = cancel.cancelled() => {
            conn.as_mut().graceful_shutdown();
            let _ = conn.await;
        }
    }
}
