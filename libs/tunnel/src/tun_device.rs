use std::io;
use std::net::Ipv4Addr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::unix::AsyncFd;
use tokio::process::Command;

use crate::error::{Error, Result};

const MTU: u32 = 1420;
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;
const IFNAMSIZ: usize = 16;
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(200);
const TEARDOWN_ATTEMPTS: u32 = 3;

#[repr(C)]
struct IfReq {
    name: [libc::c_char; IFNAMSIZ],
    flags: libc::c_short,
    _padding: [u8; 64 - IFNAMSIZ - std::mem::size_of::<libc::c_short>()],
}

/// Derives the per-peer interface name `arqut-<8 hex chars>` from the
/// SHA-256 digest of the peer id, so the same peer always gets the same
/// interface name across reconnects.
pub fn interface_name(peer_id: &str) -> String {
    let digest = Sha256::digest(peer_id.as_bytes());
    format!("arqut-{}", hex::encode(&digest[..4]))
}

/// A per-peer Linux TUN device, brought up with the peer's edge IP and torn
/// down on drop via `ip link delete`.
pub struct TunDevice {
    name: String,
    fd: AsyncFd<OwnedFd>,
}

impl TunDevice {
    /// Opens (or reuses) the kernel TUN device named for `peer_id`, assigns
    /// `edge_ip/24`, and brings the link up. If the device is busy (still
    /// tearing down from a prior session), deletes the stale interface and
    /// retries once after 200ms, per the documented bring-up algorithm.
    pub async fn create(peer_id: &str, edge_ip: Ipv4Addr) -> Result<Self> {
        let name = interface_name(peer_id);

        let fd = match open_tun_raw(&name) {
            Ok(fd) => fd,
            Err(error) if error.raw_os_error() == Some(libc::EBUSY) => {
                tracing::debug!(interface = %name, "tun device busy, deleting stale device and retrying");
                Self::teardown(&name).await;
                tokio::time::sleep(BUSY_RETRY_DELAY).await;
                open_tun_raw(&name).map_err(|error| Error::PlatformResource(error.to_string()))?
            }
            Err(error) => return Err(Error::PlatformResource(error.to_string())),
        };

        set_non_blocking(fd.as_raw_fd())?;

        run_ip(&["addr", "add", &format!("{edge_ip}/24"), "dev", &name]).await?;
        run_ip(&["link", "set", &name, "mtu", &MTU.to_string()]).await?;
        run_ip(&["link", "set", &name, "up"]).await?;

        Ok(Self {
            name,
            fd: AsyncFd::new(fd).map_err(|error| Error::PlatformResource(error.to_string()))?,
        })
    }

    /// Removes any `arqut-*` interfaces left behind by a prior, uncleanly
    /// terminated process. Call once on coordinator startup.
    pub async fn sweep_stale() {
        let Ok(output) = Command::new("ip").args(["link", "show"]).output().await else {
            return;
        };

        let listing = String::from_utf8_lossy(&output.stdout);

        for line in listing.lines() {
            let Some(name) = parse_interface_name(line) else {
                continue;
            };

            if name.starts_with("arqut-") {
                tracing::info!(interface = %name, "removing stale interface from previous run");
                let _ = run_ip(&["link", "delete", &name]).await;
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let mut guard = self
                .fd
                .readable()
                .await
                .map_err(|error| Error::PlatformResource(error.to_string()))?;

            match guard.try_io(|fd| read_fd(fd.as_raw_fd(), buf)) {
                Ok(result) => return result.map_err(|error| Error::PlatformResource(error.to_string())),
                Err(_would_block) => continue,
            }
        }
    }

    pub async fn write(&self, packet: &[u8]) -> Result<()> {
        loop {
            let mut guard = self
                .fd
                .writable()
                .await
                .map_err(|error| Error::PlatformResource(error.to_string()))?;

            match guard.try_io(|fd| write_fd(fd.as_raw_fd(), packet)) {
                Ok(result) => return result.map(|_| ()).map_err(|error| Error::PlatformResource(error.to_string())),
                Err(_would_block) => continue,
            }
        }
    }

    /// Deletes the interface, retrying up to 3 times with a
    /// `100ms * attempt` backoff. "Cannot find device" is treated as
    /// successful teardown since it means the kernel already reclaimed it.
    pub async fn teardown(name: &str) {
        for attempt in 1..=TEARDOWN_ATTEMPTS {
            match run_ip(&["link", "delete", name]).await {
                Ok(()) => return,
                Err(error) if is_missing_device(&error) => return,
                Err(error) => {
                    tracing::debug!(interface = %name, attempt, %error, "failed to delete interface, retrying");
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
            }
        }

        tracing::warn!(interface = %name, "giving up on interface teardown after {TEARDOWN_ATTEMPTS} attempts");
    }
}

impl Drop for TunDevice {
    fn drop(&mut self) {
        let name = self.name.clone();
        tokio::spawn(async move { TunDevice::teardown(&name).await });
    }
}

fn is_missing_device(error: &Error) -> bool {
    matches!(error, Error::PlatformResource(message) if message.contains("Cannot find device"))
}

fn parse_interface_name(line: &str) -> Option<&str> {
    let rest = line.split_once(": ")?.1;
    let name = rest.split(['@', ':']).next()?;
    Some(name.trim())
}

async fn run_ip(args: &[&str]) -> Result<()> {
    let output = Command::new("ip")
        .args(args)
        .output()
        .await
        .map_err(|error| Error::PlatformResource(error.to_string()))?;

    if output.status.success() {
        return Ok(());
    }

    let message = String::from_utf8_lossy(&output.stderr).trim().to_string();
    Err(Error::PlatformResource(if message.is_empty() {
        format!("ip {} exited with {}", args.join(" "), output.status)
    } else {
        message
    }))
}

fn open_tun_raw(name: &str) -> io::Result<OwnedFd> {
    let path = c"/dev/net/tun";

    let raw = unsafe { libc::open(path.as_ptr(), libc::O_RDWR) };
    if raw < 0 {
        return Err(io::Error::last_os_error());
    }

    // Safety: `raw` was just checked non-negative and is not used elsewhere.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    let mut request = IfReq {
        name: [0; IFNAMSIZ],
        flags: IFF_TUN | IFF_NO_PI,
        _padding: [0; 64 - IFNAMSIZ - std::mem::size_of::<libc::c_short>()],
    };
    for (slot, byte) in request.name.iter_mut().zip(name.as_bytes()) {
        *slot = *byte as libc::c_char;
    }

    let result = unsafe { libc::ioctl(fd.as_raw_fd(), TUNSETIFF, &mut request) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(fd)
}

fn set_non_blocking(fd: RawFd) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(Error::PlatformResource(io::Error::last_os_error().to_string()));
    }

    let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(Error::PlatformResource(io::Error::last_os_error().to_string()));
    }

    Ok(())
}

fn read_fd(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    match unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) } {
        n if n < 0 => Err(io::Error::last_os_error()),
        n => Ok(n as usize),
    }
}

fn write_fd(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    match unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) } {
        n if n < 0 => Err(io::Error::last_os_error()),
        n => Ok(n as usize),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_name_is_deterministic_and_prefixed() {
        let a = interface_name("peer-123");
        let b = interface_name("peer-123");
        let c = interface_name("peer-456");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("arqut-"));
        assert_eq!(a.len(), "arqut-".len() + 8);
    }

    #[test]
    fn parses_interface_name_from_ip_link_show_line() {
        let line = "3: arqut-deadbeef@if2: <BROADCAST,MULTICAST> mtu 1420";

        assert_eq!(parse_interface_name(line), Some("arqut-deadbeef"));
    }
}
