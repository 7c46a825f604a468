use std::collections::HashMap;
use std::sync::Arc;

use boringtun::x25519::PublicKey;
use interfaces::InterfaceRegistry;
use parking_lot::RwLock;
use signaling::SignalingClient;
use tokio_util::sync::CancellationToken;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

use crate::device::WireGuardDevice;
use crate::error::{Error, Result};
use crate::keys::EdgeKeyPair;
use crate::message::{ConnectRequest, ConnectResponse, IceCandidateMessage, SessionDescriptionMessage};
use crate::peer_table::{PeerConnectionState, PeerTable};
use crate::session::{self, PeerSession};
use crate::tun_device::TunDevice;
use crate::turn::{self, TurnStore};

/// A live peer's negotiated session plus the resources it owns, torn down
/// together on disconnect or failure.
struct PeerRuntime {
    session: Arc<PeerSession>,
    bring_up: CancellationToken,
}

/// Top-level orchestration for the WebRTC + WireGuard tunnel. One instance
/// per edge process; owns the edge's static key pair, the live peer table,
/// and the negotiated sessions.
pub struct Coordinator {
    edge_id: String,
    key_pair: EdgeKeyPair,
    peer_table: Arc<PeerTable>,
    turn_store: Arc<TurnStore>,
    signaling: SignalingClient,
    interfaces: Arc<InterfaceRegistry>,
    webrtc_api: API,
    runtimes: RwLock<HashMap<String, Arc<PeerRuntime>>>,
}

impl Coordinator {
    pub fn new(edge_id: String, signaling: SignalingClient, interfaces: Arc<InterfaceRegistry>) -> Arc<Self> {
        Arc::new(Self {
            edge_id,
            key_pair: EdgeKeyPair::generate(),
            peer_table: Arc::new(PeerTable::new()),
            turn_store: TurnStore::new(),
            signaling,
            interfaces,
            webrtc_api: APIBuilder::new().build(),
            runtimes: RwLock::new(HashMap::new()),
        })
    }

    pub fn public_key_hex(&self) -> String {
        self.key_pair.public_key_hex()
    }

    /// Registers all signaling handlers and sweeps stale interfaces from a
    /// prior run. Call once before `signaling.connect(...)`.
    pub async fn install(self: &Arc<Self>) {
        TunDevice::sweep_stale().await;

        turn::install(&self.signaling, self.turn_store.clone());

        for message_type in ["connect-request", "api-connect-request"] {
            let coordinator = self.clone();
            self.signaling.register_handler(message_type, move |frame, _conn_token| {
                let coordinator = coordinator.clone();
                Box::pin(async move {
                    if let Err(error) = coordinator.handle_connect_request(frame).await {
                        tracing::warn!(%error, "failed to handle connect request");
                    }
                })
            });
        }

        let offer_coordinator = self.clone();
        self.signaling.register_handler("offer", move |frame, conn_token| {
            let coordinator = offer_coordinator.clone();
            Box::pin(async move {
                tokio::select! {
                    () = conn_token.cancelled() => {}
                    result = coordinator.handle_offer(frame) => {
                        if let Err(error) = result {
                            tracing::warn!(%error, "failed to handle offer");
                        }
                    }
                }
            })
        });

        let ice_coordinator = self.clone();
        self.signaling.register_handler("ice-candidate", move |frame, _conn_token| {
            let coordinator = ice_coordinator.clone();
            Box::pin(async move {
                if let Err(error) = coordinator.handle_ice_candidate(frame).await {
                    tracing::warn!(%error, "failed to handle ice candidate");
                }
            })
        });
    }

    async fn handle_connect_request(self: &Arc<Self>, frame: signaling::Frame) -> Result<()> {
        let request: ConnectRequest = serde_json::from_value(frame.data)
            .map_err(|error| Error::PeerProtocol(format!("malformed connect-request: {error}")))?;

        // Register before tearing down any existing session so a repeat
        // connect-request for the same id preserves its previously assigned
        // index (`PeerTable::register`'s re-registration path) instead of
        // losing it to the old session's teardown.
        let peer = self.peer_table.register(request.id.clone(), request.public_key)?;

        if let Some(existing) = self.runtimes.write().remove(&request.id) {
            self.teardown_session(&request.id, existing).await;
        }

        let response = ConnectResponse {
            index: peer.index,
            id: self.edge_id.clone(),
            type_: "edge",
            public_key: self.key_pair.public_key_hex(),
            edge_ip: peer.edge_ip.to_string(),
            client_ip: peer.client_ip.to_string(),
        };

        let response_type = if frame.type_ == "api-connect-request" {
            "api-connect-response"
        } else {
            "connect-response"
        };

        let payload = serde_json::to_value(response).expect("ConnectResponse always serializes");
        let message = signaling::OutboundMessage::new(response_type, payload).to(request.id);

        if self.signaling.outbound_channel().try_send(message).is_err() {
            tracing::warn!("outbound queue full, dropping connect-response");
        }

        Ok(())
    }

    async fn handle_offer(self: &Arc<Self>, frame: signaling::Frame) -> Result<()> {
        let peer_id = frame
            .from
            .clone()
            .ok_or_else(|| Error::PeerProtocol("offer frame missing `from`".into()))?;

        if let Some(existing) = self.runtimes.read().get(&peer_id).cloned() {
            if existing.session.failed.is_cancelled() {
                drop(existing);
                if let Some(existing) = self.runtimes.write().remove(&peer_id) {
                    self.teardown_session(&peer_id, existing).await;
                }
            } else {
                tracing::debug!(%peer_id, "ignoring offer, session already connected");
                return Ok(());
            }
        }

        let peer = self
            .peer_table
            .get(&peer_id)
            .ok_or_else(|| Error::PeerProtocol(format!("offer from unregistered peer {peer_id}")))?;
        let peer_public_key_hex = peer
            .public_key
            .clone()
            .ok_or_else(|| Error::PeerProtocol(format!("peer {peer_id} has no public key on file")))?;

        let offer: SessionDescriptionMessage = serde_json::from_value(frame.data)
            .map_err(|error| Error::PeerProtocol(format!("malformed offer: {error}")))?;

        let ice_servers = session::ice_servers(self.turn_store.current());

        let signaling = self.signaling.clone();
        let forward_peer_id = peer_id.clone();
        let (session, answer_sdp) = PeerSession::answer(&self.webrtc_api, ice_servers, offer.sdp, move |candidate| {
            let signaling = signaling.clone();
            let peer_id = forward_peer_id.clone();

            let payload = IceCandidateMessage {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
            };
            let data = serde_json::to_value(payload).expect("IceCandidateMessage always serializes");
            let message = signaling::OutboundMessage::new("ice-candidate", data).to(peer_id);

            if signaling.outbound_channel().try_send(message).is_err() {
                tracing::warn!("outbound queue full, dropping ice-candidate");
            }
        })
        .await?;

        self.peer_table.set_state(&peer_id, PeerConnectionState::Connecting);

        let answer_payload = serde_json::to_value(SessionDescriptionMessage { sdp: answer_sdp })
            .expect("SessionDescriptionMessage always serializes");
        let answer_message = signaling::OutboundMessage::new("answer", answer_payload).to(peer_id.clone());
        if self.signaling.outbound_channel().try_send(answer_message).is_err() {
            tracing::warn!("outbound queue full, dropping answer");
        }

        let bring_up = CancellationToken::new();
        self.runtimes.write().insert(
            peer_id.clone(),
            Arc::new(PeerRuntime {
                session: session.clone(),
                bring_up: bring_up.clone(),
            }),
        );

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator
                .bring_up_wireguard(peer_id, peer.index, peer.client_ip, peer.edge_ip, peer_public_key_hex, session, bring_up)
                .await;
        });

        Ok(())
    }

    async fn bring_up_wireguard(
        self: Arc<Self>,
        peer_id: String,
        index: u8,
        client_ip: std::net::Ipv4Addr,
        edge_ip: std::net::Ipv4Addr,
        peer_public_key_hex: String,
        session: Arc<PeerSession>,
        cancel: CancellationToken,
    ) {
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = session.wait_until_ready() => {
                if let Err(error) = result {
                    tracing::warn!(%peer_id, %error, "peer connection failed before wireguard bring-up");
                    self.remove_runtime(&peer_id).await;
                    return;
                }
            }
        }

        if let Err(error) = self
            .bring_up_wireguard_inner(&peer_id, index, client_ip, edge_ip, &peer_public_key_hex, &session, &cancel)
            .await
        {
            tracing::warn!(%peer_id, %error, "wireguard bring-up failed, tearing down peer");
            self.remove_runtime(&peer_id).await;
        }
    }

    async fn bring_up_wireguard_inner(
        &self,
        peer_id: &str,
        index: u8,
        client_ip: std::net::Ipv4Addr,
        edge_ip: std::net::Ipv4Addr,
        peer_public_key_hex: &str,
        session: &Arc<PeerSession>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let peer_public_key_bytes: [u8; 32] = hex::decode(peer_public_key_hex)
            .map_err(|error| Error::PeerProtocol(format!("invalid peer public key hex: {error}")))?
            .try_into()
            .map_err(|_| Error::PeerProtocol("peer public key must be 32 bytes".into()))?;
        let peer_public_key = PublicKey::from(peer_public_key_bytes);

        let config = crate::ipc::PeerConfig::new(self.key_pair.private_key_hex(), peer_public_key_hex.to_string(), client_ip);
        tracing::debug!(%peer_id, allowed_ip = %config.allowed_ip, "programming wireguard device");

        let tun = Arc::new(TunDevice::create(peer_id, edge_ip).await?);
        let device = Arc::new(WireGuardDevice::new(
            self.key_pair.private_key().clone(),
            peer_public_key,
            index as u32,
            session.bind.clone(),
            tun.clone(),
        ));

        device.initiate_handshake().await?;

        self.peer_table.set_state(peer_id, PeerConnectionState::Connected);
        self.interfaces.add(tun.name().to_string(), edge_ip.into());

        let run_cancel = cancel.clone();
        let run_device = device.clone();
        tokio::spawn(async move {
            if let Err(error) = run_device.run(run_cancel).await {
                tracing::warn!(%error, "wireguard device loop exited with error");
            }
        });

        Ok(())
    }

    async fn handle_ice_candidate(self: &Arc<Self>, frame: signaling::Frame) -> Result<()> {
        let peer_id = frame
            .from
            .clone()
            .ok_or_else(|| Error::PeerProtocol("ice-candidate frame missing `from`".into()))?;

        let Some(runtime) = self.runtimes.read().get(&peer_id).cloned() else {
            tracing::debug!(%peer_id, "ice-candidate for unknown peer, dropping");
            return Ok(());
        };

        let candidate: IceCandidateMessage = serde_json::from_value(frame.data)
            .map_err(|error| Error::PeerProtocol(format!("malformed ice-candidate: {error}")))?;

        runtime
            .session
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                ..Default::default()
            })
            .await
    }

    /// Full teardown for a peer that is actually going away: session plus
    /// its peer table entry, freeing the index for reallocation. Used on
    /// connection failure, not on re-registration or renegotiation of a
    /// peer that is about to get a fresh session under the same id.
    async fn remove_runtime(&self, peer_id: &str) {
        if let Some(runtime) = self.runtimes.write().remove(peer_id) {
            self.teardown_session(peer_id, runtime).await;
            self.peer_table.remove(peer_id);
        }
    }

    /// Peer session teardown per the close-order contract: bind stops first
    /// (via peer connection close, which closes the data channel), then the
    /// WireGuard device's background loop is cancelled, then the TUN device
    /// is dropped (which retries `ip link delete` in the background). Leaves
    /// the peer table entry untouched, so callers replacing a session under
    /// the same id (reconnect, renegotiated offer) keep their index.
    async fn teardown_session(&self, peer_id: &str, runtime: Arc<PeerRuntime>) {
        runtime.bring_up.cancel();
        runtime.session.close().await;
        self.interfaces.remove(&crate::tun_device::interface_name(peer_id));
    }
}
