// vidmesh_core/src/domain.rs
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::MeshError;

/// Identity of a content peer. Two peers on one host are distinct when their ports differ.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerAddr {
    pub host: String,
    pub port: u16,
}

impl PeerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddr {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| MeshError::Protocol(format!("expected host:port, got {s:?}")))?;
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(MeshError::Protocol(format!("bad host in {s:?}")));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| MeshError::Protocol(format!("bad port in {s:?}")))?;
        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for PeerAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// A named piece of content and its length in bytes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentDescriptor {
    pub name: String,
    pub total_size: u64,
}

impl ContentDescriptor {
    pub fn new(name: impl Into<String>, total_size: u64) -> Self {
        Self {
            name: name.into(),
            total_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_addr_parses_last_colon() {
        let p: PeerAddr = "10.0.0.7:9000".parse().unwrap();
        assert_eq!(p, PeerAddr::new("10.0.0.7", 9000));
        assert_eq!(p.to_string(), "10.0.0.7:9000");
    }

    #[test]
    fn peer_addr_rejects_garbage() {
        assert!("no-port".parse::<PeerAddr>().is_err());
        assert!("host:99999".parse::<PeerAddr>().is_err());
        assert!(":80".parse::<PeerAddr>().is_err());
    }
}
