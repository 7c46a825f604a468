use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use signaling::SignalingClient;

use crate::message::TurnRequest;

const REFRESH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct TurnCredentials {
    pub username: String,
    pub password: String,
    pub ttl: u64,
    pub urls: Vec<String>,
}

/// Holds the current TURN credential, refreshed on every signaling
/// (re)connect and once per day by a background timer.
#[derive(Default)]
pub struct TurnStore {
    current: RwLock<Option<TurnCredentials>>,
}

impl TurnStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn current(&self) -> Option<TurnCredentials> {
        self.current.read().clone()
    }

    fn set(&self, credentials: TurnCredentials) {
        *self.current.write() = Some(credentials);
    }
}

/// Registers the `turn-response` handler and on-connect bootstrap, then
/// spawns the 24-hour refresh timer. Call once during coordinator startup,
/// before `signaling.connect(...)`.
pub fn install(signaling: &SignalingClient, store: Arc<TurnStore>) {
    let handler_store = store.clone();
    signaling.register_handler("turn-response", move |frame, _conn_token| {
        let store = handler_store.clone();
        Box::pin(async move {
            match serde_json::from_value::<crate::message::TurnResponse>(frame.data) {
                Ok(response) => store.set(TurnCredentials {
                    username: response.username,
                    password: response.password,
                    ttl: response.ttl,
                    urls: response.urls,
                }),
                Err(error) => tracing::warn!(%error, "failed to parse turn-response"),
            }
        })
    });

    let connect_signaling = signaling.clone();
    signaling.add_on_connect(move || {
        let signaling = connect_signaling.clone();
        Box::pin(async move {
            request(&signaling);
            Ok(())
        })
    });

    tokio::spawn(refresh_loop(signaling.clone()));
}

fn request(signaling: &SignalingClient) {
    let payload = serde_json::to_value(TurnRequest::default()).expect("TurnRequest always serializes");
    let message = signaling::OutboundMessage::new("turn-request", payload);

    if signaling.outbound_channel().try_send(message).is_err() {
        tracing::warn!("outbound queue full, dropping turn-request");
    }
}

async fn refresh_loop(signaling: SignalingClient) {
    let mut interval = tokio::time::interval(REFRESH_INTERVAL);
    interval.tick().await; // first tick fires immediately; on-connect already covers startup

    loop {
        interval.tick().await;
        request(&signaling);
    }
}
