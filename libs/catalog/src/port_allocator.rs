use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddrV4};

use tokio::net::TcpListener;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Issues unique tunnel ports from a configured range, cross-checked
/// against both the catalog's existing assignments and the OS.
///
/// Allocation is serialized by an internal mutex so two concurrent
/// `add_service` calls can never race each other onto the same port.
pub struct PortAllocator {
    range: std::ops::Range<u16>,
    lock: Mutex<()>,
}

impl PortAllocator {
    pub fn new(range: std::ops::Range<u16>) -> Self {
        Self {
            range,
            lock: Mutex::new(()),
        }
    }

    /// Walks the configured range in ascending order, skipping ports
    /// already in `used`, and returns the first one that successfully
    /// binds.
    pub async fn allocate(&self, used: &[u16]) -> Result<u16> {
        let _guard = self.lock.lock().await;
        let used: HashSet<u16> = used.iter().copied().collect();

        for port in self.range.clone() {
            if used.contains(&port) {
                continue;
            }

            if Self::probe(port).await {
                return Ok(port);
            }
        }

        Err(Error::Exhausted(format!(
            "no free tunnel port in {:?}",
            self.range
        )))
    }

    async fn probe(port: u16) -> bool {
        let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
        TcpListener::bind(addr).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allocates_first_free_port_in_range() {
        let allocator = PortAllocator::new(8000..8001);

        let port = allocator.allocate(&[]).await.unwrap();

        assert_eq!(port, 8000);
    }

    #[tokio::test]
    async fn single_port_range_exhausts_after_first_use() {
        let allocator = PortAllocator::new(9500..9501);

        // Hold the port open so the second probe fails the bind check.
        let _held = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 9500)).await.unwrap();

        let err = allocator.allocate(&[]).await.unwrap_err();

        assert!(matches!(err, Error::Exhausted(_)));
    }

    #[tokio::test]
    async fn skips_ports_marked_used_even_if_bindable() {
        let allocator = PortAllocator::new(9600..9602);

        let port = allocator.allocate(&[9600]).await.unwrap();

        assert_eq!(port, 9601);
    }

    #[tokio::test]
    async fn empty_range_is_exhausted() {
        let allocator = PortAllocator::new(9700..9700);

        assert!(matches!(
            allocator.allocate(&[]).await.unwrap_err(),
            Error::Exhausted(_)
        ));
    }
}
