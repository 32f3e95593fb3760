// RlpxTrust -- node identity, ECIES and the RLPx authentication handshake.
//
// Crate root: module declarations and public re-exports.

pub mod crypto;
pub mod error;
pub mod handshake;
pub mod node;
pub mod rlp;

// Re-export key types at crate root for convenience.
pub use crypto::keys::{EphemeralKey, IdentityKeyPair};
pub use error::{Result, RlpxTrustError};
pub use handshake::protocol::{Initiator, Responder};
pub use handshake::secrets::Secrets;
pub use node::{Address, Node, NodeId};

// secp256k1 types appear in the public API.
pub use secp256k1::{PublicKey, SecretKey};
