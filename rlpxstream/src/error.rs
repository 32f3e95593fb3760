use std::time::Duration;

use rlpxtrust::RlpxTrustError;
use thiserror::Error;

/// All errors produced by the RlpxStream transport layer.
///
/// Peers are identified by short node id only; no variant carries key or
/// secret bytes.
#[derive(Debug, Error)]
pub enum RlpxStreamError {
    // ── Handshake errors ────────────────────────────────────────────────
    #[error("handshake failed during {stage} with {peer}: {source}")]
    Handshake {
        stage: &'static str,
        peer: String,
        #[source]
        source: RlpxTrustError,
    },

    #[error("handshake cancelled")]
    Cancelled,

    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    // ── Frame errors ────────────────────────────────────────────────────
    #[error("{stage} MAC mismatch")]
    MacMismatch { stage: &'static str },

    #[error("{direction} is poisoned by an earlier failure")]
    Poisoned { direction: &'static str },

    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    // ── I/O errors ──────────────────────────────────────────────────────
    #[error("connection is closed")]
    ConnectionClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RlpxStreamError {
    pub(crate) fn handshake(stage: &'static str, peer: impl Into<String>, source: RlpxTrustError) -> Self {
        RlpxStreamError::Handshake {
            stage,
            peer: peer.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RlpxStreamError>;
