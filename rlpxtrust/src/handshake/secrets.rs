// Session secret derivation.
//
//   ecdhe      = ECDH_x(own_eph, remote_eph)
//   shared     = keccak(ecdhe || keccak(resp_nonce || init_nonce))
//   aes_secret = keccak(ecdhe || shared)
//   mac_secret = keccak(ecdhe || aes_secret)
//   mac1       = keccak(mac_secret ^ resp_nonce || auth_ciphertext)
//   mac2       = keccak(mac_secret ^ init_nonce || ack_ciphertext)
//
// The initiator sends with mac1 and receives with mac2; the responder the
// other way round.

use std::fmt;

use secp256k1::PublicKey;
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::crypto::hash::{keccak256_concat, xor32};
use crate::crypto::keys::EphemeralKey;
use crate::error::Result;
use crate::handshake::messages::NONCE_LEN;

/// Which side of the handshake is deriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn label(self) -> &'static str {
        match self {
            Role::Initiator => "initiator",
            Role::Responder => "responder",
        }
    }
}

/// The handshake messages both sides saw, exactly as sent on the wire.
#[derive(Debug, Clone, Copy)]
pub struct Transcript<'a> {
    pub initiator_nonce: &'a [u8; NONCE_LEN],
    pub responder_nonce: &'a [u8; NONCE_LEN],
    pub auth_ciphertext: &'a [u8],
    pub ack_ciphertext: &'a [u8],
}

/// Secrets handed to the frame transport.
pub struct Secrets {
    pub aes_secret: Zeroizing<[u8; 32]>,
    pub mac_secret: Zeroizing<[u8; 32]>,
    /// Running MAC for frames this side sends.
    pub egress_mac: Keccak256,
    /// Running MAC for frames this side receives.
    pub ingress_mac: Keccak256,
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secrets").finish_non_exhaustive()
    }
}

/// Derive the session secrets from the ephemeral agreement and transcript.
pub fn derive_secrets(
    role: Role,
    ephemeral: &EphemeralKey,
    remote_ephemeral: &PublicKey,
    transcript: &Transcript<'_>,
) -> Result<Secrets> {
    let ecdhe = Zeroizing::new(ephemeral.agree(remote_ephemeral)?);

    let nonce_hash = keccak256_concat(&[
        &transcript.responder_nonce[..],
        &transcript.initiator_nonce[..],
    ]);
    let shared = Zeroizing::new(keccak256_concat(&[&ecdhe[..], &nonce_hash[..]]));
    let aes_secret = Zeroizing::new(keccak256_concat(&[&ecdhe[..], &shared[..]]));
    let mac_secret = Zeroizing::new(keccak256_concat(&[&ecdhe[..], &aes_secret[..]]));

    let mac1 = seeded_mac(&mac_secret, transcript.responder_nonce, transcript.auth_ciphertext);
    let mac2 = seeded_mac(&mac_secret, transcript.initiator_nonce, transcript.ack_ciphertext);

    let (egress_mac, ingress_mac) = match role {
        Role::Initiator => (mac1, mac2),
        Role::Responder => (mac2, mac1),
    };

    tracing::trace!(role = role.label(), "session secrets derived");

    Ok(Secrets {
        aes_secret,
        mac_secret,
        egress_mac,
        ingress_mac,
    })
}

fn seeded_mac(mac_secret: &[u8; 32], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> Keccak256 {
    let seed = Zeroizing::new(xor32(mac_secret, nonce));
    let mut mac = Keccak256::new();
    mac.update(&seed[..]);
    mac.update(ciphertext);
    mac
}

/// Digest of a running MAC without consuming it.
pub fn mac_digest(mac: &Keccak256) -> [u8; 32] {
    mac.clone().finalize().into()
}
