use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;

use crate::error::{Error, Result};

const RECEIVE_CHANNEL_CAPACITY: usize = 100;
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(100);

/// Adapts a single WebRTC data channel labeled `"wireguard"` into the
/// datagram send/receive interface that a userspace WireGuard device
/// expects of its transport. One bind per peer.
///
/// The receive side is a `tokio::sync::Mutex` rather than a `parking_lot`
/// one: `receive` holds its guard across an `.await`, and `parking_lot`
/// guards are neither `Send`-across-await-safe for that nor meant to be;
/// the WireGuard device loop that calls `receive` is spawned onto the
/// runtime, so the future must stay `Send`.
pub struct WebRtcBind {
    data_channel: RwLock<Option<Arc<RTCDataChannel>>>,
    closed: AtomicBool,
    sender: RwLock<mpsc::Sender<Vec<u8>>>,
    receiver: AsyncMutex<mpsc::Receiver<Vec<u8>>>,
}

impl WebRtcBind {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel(RECEIVE_CHANNEL_CAPACITY);

        Arc::new(Self {
            data_channel: RwLock::new(None),
            closed: AtomicBool::new(false),
            sender: RwLock::new(tx),
            receiver: AsyncMutex::new(rx),
        })
    }

    /// Re-opens a previously closed bind: resets the closed flag and
    /// allocates a fresh receive channel, matching the contract that a
    /// bind may be reused for a new peer session rather than rebuilt.
    pub async fn reopen(&self) {
        let (tx, rx) = mpsc::channel(RECEIVE_CHANNEL_CAPACITY);
        *self.sender.write() = tx;
        *self.receiver.lock().await = rx;
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Wires this bind to a freshly opened data channel: registers
    /// `on_message` to enqueue inbound datagrams and `on_close` to mark the
    /// bind closed.
    pub fn attach(self: &Arc<Self>, data_channel: Arc<RTCDataChannel>) {
        let on_message_bind = self.clone();
        data_channel.on_message(Box::new(move |message: DataChannelMessage| {
            let bind = on_message_bind.clone();
            Box::pin(async move {
                bind.enqueue(message.data.to_vec());
            })
        }));

        let on_close_bind = self.clone();
        data_channel.on_close(Box::new(move || {
            let bind = on_close_bind.clone();
            Box::pin(async move {
                bind.mark_closed();
            })
        }));

        *self.data_channel.write() = Some(data_channel);
    }

    fn enqueue(&self, datagram: Vec<u8>) {
        if self.sender.read().try_send(datagram).is_err() {
            tracing::debug!("webrtc bind receive queue full, dropping datagram");
        }
    }

    fn mark_closed(&self) {
        *self.data_channel.write() = None;
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Blocks up to 100ms for a datagram. Returns `Ok(0)` on timeout (lets
    /// the WireGuard device tick its retransmit/keepalive timers); returns
    /// an error once the bind has been closed.
    pub async fn receive(&self, buf: &mut [u8]) -> Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::BindClosed);
        }

        let mut rx = self.receiver.lock().await;
        let datagram = match tokio::time::timeout(RECEIVE_TIMEOUT, rx.recv()).await {
            Ok(Some(datagram)) => datagram,
            Ok(None) => return Err(Error::BindClosed),
            Err(_elapsed) => return Ok(0),
        };
        drop(rx);

        if datagram.len() > buf.len() {
            return Err(Error::PlatformResource(
                "datagram larger than supplied buffer".into(),
            ));
        }

        buf[..datagram.len()].copy_from_slice(&datagram);
        Ok(datagram.len())
    }

    /// Writes each non-empty buffer as one data-channel message. Buffers
    /// are copied because WireGuard may reuse its send buffers.
    pub async fn send(&self, buffers: &[&[u8]]) -> Result<()> {
        let data_channel = self.data_channel.read().clone();
        let Some(data_channel) = data_channel else {
            return Err(Error::BindClosed);
        };

        if self.closed.load(Ordering::SeqCst) || data_channel.ready_state() != RTCDataChannelState::Open {
            return Err(Error::BindClosed);
        }

        for buffer in buffers {
            if buffer.is_empty() {
                continue;
            }

            data_channel
                .send(&bytes::Bytes::copy_from_slice(buffer))
                .await
                .map_err(|error| Error::Transport(error.to_string()))?;
        }

        Ok(())
    }

    /// WireGuard treats this link as point-to-point; only one datagram is
    /// ever batched per send/receive call.
    pub fn batch_size(&self) -> usize {
        1
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn receive_times_out_with_empty_result_when_idle() {
        let bind = WebRtcBind::new();
        let mut buf = [0u8; 1500];

        let n = bind.receive(&mut buf).await.unwrap();

        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn receive_after_close_is_an_error() {
        let bind = WebRtcBind::new();
        bind.mark_closed();

        let mut buf = [0u8; 1500];
        let result = bind.receive(&mut buf).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn send_without_attached_channel_fails_closed() {
        let bind = WebRtcBind::new();

        let result = bind.send(&[b"hello"]).await;

        assert!(matches!(result, Err(Error::BindClosed)));
    }

    #[tokio::test]
    async fn enqueue_then_receive_round_trips_a_datagram() {
        let bind = WebRtcBind::new();
        bind.enqueue(vec![1, 2, 3]);

        let mut buf = [0u8; 16];
        let n = bind.receive(&mut buf).await.unwrap();

        assert_eq!(&buf[..n], &[1, 2, 3]);
    }

    #[tokio::test]
    async fn reopen_after_close_allows_receiving_again() {
        let bind = WebRtcBind::new();
        bind.mark_closed();
        bind.reopen().await;

        let mut buf = [0u8; 16];
        let n = bind.receive(&mut buf).await.unwrap();

        assert_eq!(n, 0);
    }
}
