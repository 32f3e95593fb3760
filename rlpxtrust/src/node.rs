// Node identity: a peer's static public key plus its network address.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use secp256k1::PublicKey;

use crate::crypto::keys::{pubkey_from_bytes, pubkey_to_bytes, PUBKEY_LEN};
use crate::error::Result;

/// 64-byte node ID: the uncompressed public key without its SEC1 tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; PUBKEY_LEN]);

impl NodeId {
    pub fn from_public_key(public: &PublicKey) -> Self {
        NodeId(pubkey_to_bytes(public))
    }

    pub fn to_public_key(&self) -> Result<PublicKey> {
        pubkey_from_bytes(&self.0)
    }

    /// First 8 bytes in hex, for log lines and error context.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({}..)", self.short())
    }
}

/// Network endpoint of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub ip: IpAddr,
    pub udp_port: u16,
    pub tcp_port: u16,
}

impl Address {
    pub fn new(ip: IpAddr, udp_port: u16, tcp_port: u16) -> Self {
        Self {
            ip,
            udp_port,
            tcp_port,
        }
    }

    /// The unspecified address `0.0.0.0:0`, used when the peer's endpoint is not known.
    pub fn unspecified() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0, 0)
    }

    pub fn tcp_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.tcp_port)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port(), addr.port())
    }
}

/// A handshake peer. Immutable once a handshake is bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub pubkey: PublicKey,
    pub address: Address,
}

impl Node {
    pub fn new(pubkey: PublicKey, address: Address) -> Self {
        Self { pubkey, address }
    }

    pub fn id(&self) -> NodeId {
        NodeId::from_public_key(&self.pubkey)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "enode://{}@{}", self.id().short(), self.address.tcp_socket_addr())
    }
}
