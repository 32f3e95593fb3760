// Handshake state machine.

use std::fmt;

use secp256k1::PublicKey;

use crate::error::{Result, RlpxTrustError};
use crate::handshake::messages::{WireFormat, NONCE_LEN};

/// The current state of an RLPx handshake.
///
/// Transitions only move forward:
///
/// ```text
/// initiator: Created -> AuthSent -> AckReceived  -> SecretsDerived -> Complete
/// responder: Created -> AuthReceived -> AckSent  -> SecretsDerived -> Complete
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    /// Keys and nonce generated, nothing exchanged yet.
    Created,

    /// Initiator has encrypted its auth message.
    AuthSent,

    /// Initiator has decoded the responder's ack.
    AckReceived {
        remote_ephemeral: PublicKey,
        remote_nonce: [u8; NONCE_LEN],
    },

    /// Responder has decoded the initiator's auth.
    AuthReceived {
        remote_ephemeral: PublicKey,
        remote_nonce: [u8; NONCE_LEN],
        format: WireFormat,
    },

    /// Responder has encrypted its ack.
    AckSent {
        remote_ephemeral: PublicKey,
        remote_nonce: [u8; NONCE_LEN],
    },

    /// Session secrets have been derived; the ephemeral key is gone.
    SecretsDerived,

    /// The handshake result has been handed to the caller.
    Complete,
}

impl HandshakeState {
    /// Human-readable label for the current state (used in error messages).
    pub fn label(&self) -> &'static str {
        match self {
            HandshakeState::Created => "Created",
            HandshakeState::AuthSent => "AuthSent",
            HandshakeState::AckReceived { .. } => "AckReceived",
            HandshakeState::AuthReceived { .. } => "AuthReceived",
            HandshakeState::AckSent { .. } => "AckSent",
            HandshakeState::SecretsDerived => "SecretsDerived",
            HandshakeState::Complete => "Complete",
        }
    }

    /// The error for attempting to move from this state to `to`.
    pub(crate) fn invalid_transition(&self, to: &str) -> RlpxTrustError {
        RlpxTrustError::InvalidStateTransition {
            from: self.label().to_string(),
            to: to.to_string(),
        }
    }

    /// Fail unless the handshake is still in `Created`.
    pub(crate) fn expect_created(&self, to: &str) -> Result<()> {
        match self {
            HandshakeState::Created => Ok(()),
            other => Err(other.invalid_transition(to)),
        }
    }

    /// The remote ephemeral key and nonce, once recorded.
    pub fn remote_ephemeral(&self) -> Option<(&PublicKey, &[u8; NONCE_LEN])> {
        match self {
            HandshakeState::AckReceived {
                remote_ephemeral,
                remote_nonce,
            }
            | HandshakeState::AuthReceived {
                remote_ephemeral,
                remote_nonce,
                ..
            }
            | HandshakeState::AckSent {
                remote_ephemeral,
                remote_nonce,
            } => Some((remote_ephemeral, remote_nonce)),
            _ => None,
        }
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
