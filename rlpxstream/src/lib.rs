//! RlpxStream -- encrypted frame transport for RLPx sessions.
//!
//! Provides:
//! - **Handshake drivers**: `initiate` / `accept` run the auth/ack exchange
//!   over any tokio duplex stream, with cancellation and a deadline
//! - **Frame codec**: AES-256-CTR bodies authenticated by a running
//!   keccak/AES MAC per direction
//! - **Transport**: whole-frame reads and writes, splittable into
//!   independent reader and writer halves
//! - **Messages**: `rlp(id) ‖ data` framing on top of frames

pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mac;
pub mod message;
pub mod transport;

// Re-export key public types at crate root.
pub use config::{HandshakeConfig, TransportConfig};
pub use error::{Result, RlpxStreamError};
pub use frame::{FrameEgress, FrameHeader, FrameIngress, HeaderData, MAX_FRAME_SIZE};
pub use handshake::{accept, initiate, Connection};
pub use message::Message;
pub use transport::{FrameReader, FrameWriter, Transport};
