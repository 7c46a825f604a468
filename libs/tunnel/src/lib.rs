mod bind;
mod coordinator;
mod device;
mod error;
mod ipc;
mod keys;
mod message;
mod peer_table;
mod session;
mod tun_device;
mod turn;

pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use keys::EdgeKeyPair;
pub use peer_table::{PeerConnectionState, PeerRecord};
pub use turn::{TurnCredentials, TurnStore};
