// Handshake and transport configuration.

use std::time::Duration;

use crate::frame::MAX_FRAME_SIZE;

/// Configuration for the async handshake drivers.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Send EIP-8 auth messages when initiating. The responder always answers
    /// in the format the auth arrived in.
    pub use_eip8: bool,
    /// Deadline for the whole exchange, from first write to derived secrets.
    pub timeout: Duration,
    /// Settings handed to the transport once the handshake completes.
    pub transport: TransportConfig,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            use_eip8: true,
            timeout: Duration::from_secs(10),
            transport: TransportConfig::default(),
        }
    }
}

/// Configuration for the frame transport.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest frame body accepted or sent. Clamped to the 24-bit limit.
    pub max_frame_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}
