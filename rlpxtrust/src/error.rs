// RlpxTrust error types

use thiserror::Error;

/// Top-level error type for the RlpxTrust crate.
///
/// Messages never carry key or secret material.
#[derive(Debug, Error)]
pub enum RlpxTrustError {
    // ── Codec errors ────────────────────────────────────────────────────
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    // ── Crypto errors ───────────────────────────────────────────────────
    #[error("ECIES decryption failed: {0}")]
    Decryption(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("could not recover public key from signature")]
    SignatureRecovery,

    // ── Handshake errors ────────────────────────────────────────────────
    #[error("auth message signed for a different static key than the bound remote")]
    RemoteKeyMismatch,

    #[error("invalid handshake state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
}

impl RlpxTrustError {
    /// Shorthand used by the codecs.
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        RlpxTrustError::MalformedMessage(msg.into())
    }
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, RlpxTrustError>;
