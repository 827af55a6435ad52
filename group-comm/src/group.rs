//! Fixed group membership.
//!
//! The group is an ordered list of [`PeerAddress`]es loaded once at startup
//! and immutable for the lifetime of the process.  Broadcasts contact peers
//! in exactly this order.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use serde::Deserialize;

use crate::config::ConfigError;

/// Integer identity of a peer.  Must be unique within a group.
pub type PeerId = u32;

/// Address used when a group entry does not name a host.
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// One group member: identity plus where its receive endpoint listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct PeerAddress {
    #[serde(rename = "peer_id")]
    pub id: PeerId,
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: IpAddr,
}

fn default_host() -> IpAddr {
    DEFAULT_HOST
}

impl PeerAddress {
    /// A loopback peer.
    pub fn new(id: PeerId, port: u16) -> Self {
        Self {
            id,
            port,
            host: DEFAULT_HOST,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl std::fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer {} ({})", self.id, self.socket_addr())
    }
}

/// On-disk layout: `{"group": [{"peer_id": 1, "port": 5000}, ...]}`.
#[derive(Debug, Deserialize)]
struct GroupFile {
    group: Vec<PeerAddress>,
}

/// Ordered, immutable group membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    members: Vec<PeerAddress>,
}

impl Group {
    /// Build a group, rejecting empty lists and duplicate peer ids.
    pub fn new(members: Vec<PeerAddress>) -> Result<Self, ConfigError> {
        if members.is_empty() {
            return Err(ConfigError::EmptyGroup);
        }
        let mut seen = HashSet::new();
        for peer in &members {
            if !seen.insert(peer.id) {
                return Err(ConfigError::DuplicatePeer(peer.id));
            }
        }
        Ok(Self { members })
    }

    /// Load the group configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::GroupFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let file: GroupFile = serde_json::from_str(text)?;
        Self::new(file.group)
    }

    /// Locate the entry matching both `id` and `port`.
    pub fn find(&self, id: PeerId, port: u16) -> Result<PeerAddress, ConfigError> {
        self.members
            .iter()
            .copied()
            .find(|p| p.id == id && p.port == port)
            .ok_or(ConfigError::UnknownPeer { id, port })
    }

    pub fn members(&self) -> &[PeerAddress] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THREE: &str = r#"{"group": [
        {"peer_id": 1, "port": 5000},
        {"peer_id": 2, "port": 5001},
        {"peer_id": 3, "port": 5002, "host": "127.0.0.2"}
    ]}"#;

    #[test]
    fn parses_in_file_order() {
        let group = Group::from_json(THREE).unwrap();
        let ids: Vec<_> = group.members().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(group.members()[0].host, DEFAULT_HOST);
        assert_eq!(
            group.members()[2].socket_addr(),
            "127.0.0.2:5002".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn find_requires_matching_port() {
        let group = Group::from_json(THREE).unwrap();
        assert_eq!(group.find(2, 5001).unwrap(), PeerAddress::new(2, 5001));
        assert!(matches!(
            group.find(2, 5000),
            Err(ConfigError::UnknownPeer { id: 2, port: 5000 })
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = Group::new(vec![PeerAddress::new(1, 5000), PeerAddress::new(1, 5001)]);
        assert!(matches!(err, Err(ConfigError::DuplicatePeer(1))));
    }

    #[test]
    fn empty_group_is_rejected() {
        assert!(matches!(
            Group::from_json(r#"{"group": []}"#),
            Err(ConfigError::EmptyGroup)
        ));
    }

    #[test]
    fn malformed_file_is_rejected() {
        assert!(matches!(
            Group::from_json(r#"{"peers": []}"#),
            Err(ConfigError::Json(_))
        ));
    }
}
