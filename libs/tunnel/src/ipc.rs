use crate::error::{Error, Result};

const SENTINEL_ENDPOINT: &str = "webrtc://peer";
const PERSISTENT_KEEPALIVE_INTERVAL: u32 = 25;

/// Parsed form of the WireGuard device configuration, expressed the way the
/// userspace `wg`/UAPI text protocol would: one `key=value` line per field,
/// `allowed_ip` scoped to the single peer's `/32`, and a sentinel endpoint
/// since there is no real UDP socket behind this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    pub private_key: String,
    pub public_key: String,
    pub allowed_ip: String,
    pub endpoint: String,
    pub persistent_keepalive_interval: u32,
}

impl PeerConfig {
    pub fn new(private_key_hex: String, peer_public_key_hex: String, client_ip: std::net::Ipv4Addr) -> Self {
        Self {
            private_key: private_key_hex,
            public_key: peer_public_key_hex,
            allowed_ip: format!("{client_ip}/32"),
            endpoint: SENTINEL_ENDPOINT.to_string(),
            persistent_keepalive_interval: PERSISTENT_KEEPALIVE_INTERVAL,
        }
    }

    pub fn to_text(&self) -> String {
        format!(
            "private_key={}\npublic_key={}\nallowed_ip={}\nendpoint={}\npersistent_keepalive_interval={}\n",
            self.private_key, self.public_key, self.allowed_ip, self.endpoint, self.persistent_keepalive_interval,
        )
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut private_key = None;
        let mut public_key = None;
        let mut allowed_ip = None;
        let mut endpoint = None;
        let mut persistent_keepalive_interval = PERSISTENT_KEEPALIVE_INTERVAL;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| Error::PeerProtocol(format!("malformed wireguard config line: {line}")))?;

            match key {
                "private_key" => private_key = Some(value.to_string()),
                "public_key" => public_key = Some(value.to_string()),
                "allowed_ip" => allowed_ip = Some(value.to_string()),
                "endpoint" => endpoint = Some(value.to_string()),
                "persistent_keepalive_interval" => {
                    persistent_keepalive_interval = value
                        .parse()
                        .map_err(|_| Error::PeerProtocol(format!("invalid persistent_keepalive_interval: {value}")))?;
                }
                other => {
                    return Err(Error::PeerProtocol(format!("unknown wireguard config key: {other}")));
                }
            }
        }

        Ok(Self {
            private_key: private_key
                .ok_or_else(|| Error::PeerProtocol("missing private_key".into()))?,
            public_key: public_key.ok_or_else(|| Error::PeerProtocol("missing public_key".into()))?,
            allowed_ip: allowed_ip.ok_or_else(|| Error::PeerProtocol("missing allowed_ip".into()))?,
            endpoint: endpoint.unwrap_or_else(|| SENTINEL_ENDPOINT.to_string()),
            persistent_keepalive_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn round_trips_through_text() {
        let config = PeerConfig::new("a".repeat(64), "b".repeat(64), Ipv4Addr::new(10, 0, 5, 2));

        let parsed = PeerConfig::parse(&config.to_text()).unwrap();

        assert_eq!(parsed, config);
    }

    #[test]
    fn uses_sentinel_endpoint_and_default_keepalive() {
        let config = PeerConfig::new("a".repeat(64), "b".repeat(64), Ipv4Addr::new(10, 0, 5, 2));

        assert_eq!(config.endpoint, "webrtc://peer");
        assert_eq!(config.persistent_keepalive_interval, 25);
        assert_eq!(config.allowed_ip, "10.0.5.2/32");
    }

    #[test]
    fn rejects_malformed_line() {
        let result = PeerConfig::parse("not a key value line");

        assert!(result.is_err());
    }

    #[test]
    fn rejects_missing_required_field() {
        let result = PeerConfig::parse("private_key=abc\n");

        assert!(result.is_err());
    }
}
