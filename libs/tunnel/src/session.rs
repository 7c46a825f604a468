use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use webrtc::api::API;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_credential_type::RTCIceCredentialType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::bind::WebRtcBind;
use crate::error::{Error, Result};
use crate::turn::TurnCredentials;

/// How long the data channel is left to settle after `OnOpen` before the
/// WireGuard device is brought up over it.
pub const DATA_CHANNEL_SETTLE: Duration = Duration::from_millis(200);

const DATA_CHANNEL_LABEL: &str = "wireguard";

pub fn ice_servers(turn: Option<TurnCredentials>) -> Vec<RTCIceServer> {
    let mut servers = vec![RTCIceServer {
        urls: vec!["stun:stun.l.google.com:19302".to_string()],
        ..Default::default()
    }];

    if let Some(turn) = turn {
        servers.push(RTCIceServer {
            urls: turn.urls,
            username: turn.username,
            credential: turn.password,
            credential_type: RTCIceCredentialType::Password,
        });
    }

    servers
}

/// A negotiated WebRTC peer connection in the answerer role, carrying one
/// `"wireguard"` data channel bridged through a [`WebRtcBind`].
pub struct PeerSession {
    pub peer_connection: Arc<RTCPeerConnection>,
    pub bind: Arc<WebRtcBind>,
    /// Flips to `true` once the data channel has opened and settled; the
    /// caller brings up the WireGuard device on this transition.
    pub data_channel_ready: watch::Receiver<bool>,
    /// Cancelled when the peer connection transitions to `Failed`,
    /// `Disconnected`, or `Closed`.
    pub failed: CancellationToken,
}

impl PeerSession {
    /// Creates a peer connection, wires ICE-candidate forwarding,
    /// connection-state teardown signaling, and the inbound `"wireguard"`
    /// data channel, then answers `offer_sdp`.
    ///
    /// `on_ice_candidate` is invoked for every locally gathered candidate so
    /// the caller can forward it via signaling (trickle ICE rather than
    /// waiting for gathering to complete).
    pub async fn answer(
        api: &API,
        ice_servers: Vec<RTCIceServer>,
        offer_sdp: String,
        on_ice_candidate: impl Fn(RTCIceCandidateInit) + Send + Sync + 'static,
    ) -> Result<(Arc<Self>, String)> {
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let peer_connection = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|error| Error::Transport(error.to_string()))?,
        );

        let failed = CancellationToken::new();
        let state_failed = failed.clone();
        peer_connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let failed = state_failed.clone();
            Box::pin(async move {
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed
                        | RTCPeerConnectionState::Disconnected
                        | RTCPeerConnectionState::Closed
                ) {
                    failed.cancel();
                }
            })
        }));

        let on_ice_candidate = Arc::new(on_ice_candidate);
        peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let on_ice_candidate = on_ice_candidate.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };

                match candidate.to_json().await {
                    Ok(init) => on_ice_candidate(init),
                    Err(error) => tracing::warn!(%error, "failed to serialize local ice candidate"),
                }
            })
        }));

        let bind = WebRtcBind::new();
        let (ready_tx, ready_rx) = watch::channel(false);
        let ready_tx = Arc::new(ready_tx);

        let on_data_channel_bind = bind.clone();
        peer_connection.on_data_channel(Box::new(move |data_channel: Arc<RTCDataChannel>| {
            let bind = on_data_channel_bind.clone();
            let ready_tx = ready_tx.clone();

            Box::pin(async move {
                if data_channel.label() != DATA_CHANNEL_LABEL {
                    tracing::debug!(label = %data_channel.label(), "ignoring data channel with unexpected label");
                    return;
                }

                bind.attach(data_channel.clone());

                data_channel.on_open(Box::new(move || {
                    let ready_tx = ready_tx.clone();
                    Box::pin(async move {
                        tokio::time::sleep(DATA_CHANNEL_SETTLE).await;
                        let _ = ready_tx.send(true);
                    })
                }));
            })
        }));

        let offer = RTCSessionDescription::offer(offer_sdp).map_err(|error| Error::PeerProtocol(error.to_string()))?;
        peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|error| Error::Transport(error.to_string()))?;

        let answer = peer_connection
            .create_answer(None)
            .await
            .map_err(|error| Error::Transport(error.to_string()))?;
        peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|error| Error::Transport(error.to_string()))?;

        let session = Arc::new(Self {
            peer_connection,
            bind,
            data_channel_ready: ready_rx,
            failed,
        });

        Ok((session, answer.sdp))
    }

    pub async fn add_ice_candidate(&self, init: RTCIceCandidateInit) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(init)
            .await
            .map_err(|error| Error::Transport(error.to_string()))
    }

    /// Waits until the data channel has opened and settled, or the
    /// connection fails first.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let mut ready = self.data_channel_ready.clone();

        tokio::select! {
            _ = self.failed.cancelled() => Err(Error::Transport("peer connection failed before data channel opened".into())),
            result = wait_for_true(&mut ready) => result,
        }
    }

    pub async fn close(&self) {
        if let Err(error) = self.peer_connection.close().await {
            tracing::debug!(%error, "error closing peer connection");
        }
    }
}

async fn wait_for_true(rx: &mut watch::Receiver<bool>) -> Result<()> {
    loop {
        if *rx.borrow() {
            return Ok(());
        }

        if rx.changed().await.is_err() {
            return Err(Error::Transport("data channel readiness sender dropped".into()));
        }
    }
}
