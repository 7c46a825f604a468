use std::sync::Arc;
use std::time::Duration;

use boringtun::noise::rate_limiter::RateLimiter;
use boringtun::noise::{Tunn, TunnResult};
use boringtun::x25519::{PublicKey, StaticSecret};
use tokio_util::sync::CancellationToken;

use crate::bind::WebRtcBind;
use crate::error::{Error, Result};
use crate::tun_device::TunDevice;

const HANDSHAKE_RATE_LIMIT: u64 = 100;
const WIREGUARD_KEEP_ALIVE: u16 = 25;
/// Largest packet `boringtun` ever writes for a control message (handshake
/// init/response or keepalive); data packets are bounded by `MAX_PACKET`.
const MAX_SCRATCH_SPACE: usize = 148;
const MAX_PACKET: usize = 1500 + 64;
const TIMER_TICK: Duration = Duration::from_secs(1);

/// Drives a single `boringtun` WireGuard session between this edge and one
/// peer, bridging encrypted datagrams over a [`WebRtcBind`] and decrypted IP
/// packets to/from a [`TunDevice`].
pub struct WireGuardDevice {
    tunn: parking_lot::Mutex<Tunn>,
    bind: Arc<WebRtcBind>,
    tun: Arc<TunDevice>,
}

impl WireGuardDevice {
    pub fn new(
        private_key: StaticSecret,
        peer_public_key: PublicKey,
        index: u32,
        bind: Arc<WebRtcBind>,
        tun: Arc<TunDevice>,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(&PublicKey::from(&private_key), HANDSHAKE_RATE_LIMIT));
        let tunn = Tunn::new(
            private_key,
            peer_public_key,
            None,
            Some(WIREGUARD_KEEP_ALIVE),
            index,
            Some(rate_limiter),
        );

        Self {
            tunn: parking_lot::Mutex::new(tunn),
            bind,
            tun,
        }
    }

    /// Runs the three concurrent loops (network→tun, tun→network, timers)
    /// until `cancel` fires or the bind closes.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let network_to_tun = self.clone().network_to_tun_loop(cancel.clone());
        let tun_to_network = self.clone().tun_to_network_loop(cancel.clone());
        let timers = self.clone().timer_loop(cancel.clone());

        tokio::select! {
            result = network_to_tun => result,
            result = tun_to_network => result,
            result = timers => result,
            _ = cancel.cancelled() => Ok(()),
        }
    }

    /// Initiates the handshake by producing the first encrypted packet and
    /// sending it over the bind. Call once the data channel is open.
    pub async fn initiate_handshake(&self) -> Result<()> {
        let mut buf = [0u8; MAX_SCRATCH_SPACE];
        let result = self.tunn.lock().format_handshake_initiation(&mut buf, false);

        if let TunnResult::WriteToNetwork(packet) = result {
            self.bind.send(&[packet]).await?;
        }

        Ok(())
    }

    async fn network_to_tun_loop(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let mut recv_buf = vec![0u8; MAX_PACKET];

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let n = self.bind.receive(&mut recv_buf).await?;
            if n == 0 {
                continue;
            }

            let mut out_buf = vec![0u8; MAX_PACKET];
            let result = self.tunn.lock().decapsulate(None, &recv_buf[..n], &mut out_buf);
            self.handle_tunn_result(result).await?;
            self.drain_queued_packets().await?;
        }
    }

    async fn tun_to_network_loop(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let mut recv_buf = vec![0u8; MAX_PACKET];

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }

            let n = self.tun.read(&mut recv_buf).await?;
            if n == 0 {
                continue;
            }

            let mut out_buf = vec![0u8; MAX_PACKET];
            let result = self.tunn.lock().encapsulate(&recv_buf[..n], &mut out_buf);
            self.handle_tunn_result(result).await?;
        }
    }

    /// After decapsulating a packet, `boringtun` may have further queued
    /// packets (e.g. a handshake response sent back-to-back); draining them
    /// here rather than waiting for the next timer tick keeps handshakes
    /// snappy.
    async fn drain_queued_packets(&self) -> Result<()> {
        loop {
            let mut scratch = vec![0u8; MAX_PACKET];
            let result = self.tunn.lock().decapsulate(None, &[], &mut scratch);

            match result {
                TunnResult::WriteToNetwork(packet) => self.bind.send(&[packet]).await?,
                _ => return Ok(()),
            }
        }
    }

    async fn timer_loop(self: Arc<Self>, cancel: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(TIMER_TICK);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {
                    let mut buf = [0u8; MAX_SCRATCH_SPACE];
                    match self.tunn.lock().update_timers(&mut buf) {
                        TunnResult::Done => {}
                        TunnResult::Err(error) => return Err(Error::PeerProtocol(format!("{error:?}"))),
                        TunnResult::WriteToNetwork(packet) => self.bind.send(&[packet]).await?,
                        TunnResult::WriteToTunnelV4(_, _) | TunnResult::WriteToTunnelV6(_, _) => {
                            unreachable!("update_timers never writes to the tunnel")
                        }
                    }
                }
            }
        }
    }

    async fn handle_tunn_result(&self, result: TunnResult<'_>) -> Result<()> {
        match result {
            TunnResult::Done => Ok(()),
            TunnResult::Err(error) => Err(Error::PeerProtocol(format!("{error:?}"))),
            TunnResult::WriteToNetwork(packet) => self.bind.send(&[packet]).await,
            TunnResult::WriteToTunnelV4(packet, _) | TunnResult::WriteToTunnelV6(packet, _) => {
                self.tun.write(packet).await
            }
        }
    }
}
