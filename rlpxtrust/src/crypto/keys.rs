// secp256k1 keypairs, ECDH agreement and recoverable signatures.

use secp256k1::ecdh::shared_secret_point;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, RlpxTrustError};

/// Length of a serialized public key without the `0x04` SEC1 tag.
pub const PUBKEY_LEN: usize = 64;

/// Length of a recoverable signature: `r (32) || s (32) || v (1)`.
pub const SIGNATURE_LEN: usize = 65;

/// A long-lived secp256k1 identity keypair.
#[derive(Debug)]
pub struct IdentityKeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl IdentityKeyPair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let secret = SecretKey::new(&mut rand::thread_rng());
        Self::from_secret_key(secret)
    }

    /// Wrap an existing secret key.
    pub fn from_secret_key(secret: SecretKey) -> Self {
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        Self { secret, public }
    }

    /// Reconstruct from 32 secret bytes.
    pub fn from_secret_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|e| RlpxTrustError::InvalidKey(format!("{e}")))?;
        Ok(Self::from_secret_key(secret))
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The 64-byte public key (no SEC1 tag).
    pub fn public_key_bytes(&self) -> [u8; PUBKEY_LEN] {
        pubkey_to_bytes(&self.public)
    }
}

impl Drop for IdentityKeyPair {
    fn drop(&mut self) {
        self.secret.non_secure_erase();
    }
}

/// A single-use ephemeral keypair.
///
/// The secret scalar is held as raw bytes so it can be wiped when the
/// handshake consumes it (or drops it on failure).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct EphemeralKey {
    secret: [u8; 32],
    #[zeroize(skip)]
    public: PublicKey,
}

impl EphemeralKey {
    /// Generate a fresh random ephemeral keypair.
    pub fn generate() -> Self {
        Self::from_secret_key(SecretKey::new(&mut rand::thread_rng()))
    }

    /// Build from a known secret (deterministic tests and vectors).
    pub fn from_secret_key(secret: SecretKey) -> Self {
        let public = PublicKey::from_secret_key(SECP256K1, &secret);
        Self {
            secret: secret.secret_bytes(),
            public,
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Sign a 32-byte message hash with the ephemeral secret.
    pub fn sign_recoverable(&self, msg_hash: &[u8; 32]) -> Result<[u8; SIGNATURE_LEN]> {
        self.with_secret_key(|secret| sign_recoverable(secret, msg_hash))
    }

    /// ECDH agreement between this ephemeral secret and `remote`.
    pub fn agree(&self, remote: &PublicKey) -> Result<[u8; 32]> {
        self.with_secret_key(|secret| ecdh_agree(secret, remote))
    }

    /// Run `f` on a temporary `SecretKey`, erased before returning.
    fn with_secret_key<T>(&self, f: impl FnOnce(&SecretKey) -> T) -> Result<T> {
        let mut secret = self.secret_key()?;
        let out = f(&secret);
        secret.non_secure_erase();
        Ok(out)
    }

    fn secret_key(&self) -> Result<SecretKey> {
        SecretKey::from_slice(&self.secret)
            .map_err(|_| RlpxTrustError::InvalidKey("ephemeral key already erased".into()))
    }
}

impl std::fmt::Debug for EphemeralKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EphemeralKey")
            .field("public", &hex::encode(pubkey_to_bytes(&self.public)))
            .finish_non_exhaustive()
    }
}

/// ECDH as used by RLPx: the raw x-coordinate of `secret * public`, unhashed.
pub fn ecdh_agree(secret: &SecretKey, public: &PublicKey) -> [u8; 32] {
    let mut point = shared_secret_point(public, secret);
    let mut x = [0u8; 32];
    x.copy_from_slice(&point[..32]);
    point.zeroize();
    x
}

/// Produce a 65-byte `r || s || v` signature with `v` in {0, 1}.
pub fn sign_recoverable(secret: &SecretKey, msg_hash: &[u8; 32]) -> [u8; SIGNATURE_LEN] {
    let msg = Message::from_digest(*msg_hash);
    let (recid, compact) = SECP256K1
        .sign_ecdsa_recoverable(&msg, secret)
        .serialize_compact();
    let mut out = [0u8; SIGNATURE_LEN];
    out[..64].copy_from_slice(&compact);
    out[64] = recid.to_i32() as u8;
    out
}

/// Recover the signer's public key from a 65-byte recoverable signature.
pub fn recover_public_key(signature: &[u8], msg_hash: &[u8; 32]) -> Result<PublicKey> {
    if signature.len() != SIGNATURE_LEN {
        return Err(RlpxTrustError::malformed(format!(
            "signature must be {SIGNATURE_LEN} bytes, got {}",
            signature.len()
        )));
    }
    let recid = RecoveryId::from_i32(i32::from(signature[64]))
        .map_err(|_| RlpxTrustError::SignatureRecovery)?;
    let sig = RecoverableSignature::from_compact(&signature[..64], recid)
        .map_err(|_| RlpxTrustError::SignatureRecovery)?;
    SECP256K1
        .recover_ecdsa(&Message::from_digest(*msg_hash), &sig)
        .map_err(|_| RlpxTrustError::SignatureRecovery)
}

/// Serialize a public key as 64 bytes (x || y), dropping the SEC1 tag.
pub fn pubkey_to_bytes(public: &PublicKey) -> [u8; PUBKEY_LEN] {
    let full = public.serialize_uncompressed();
    let mut out = [0u8; PUBKEY_LEN];
    out.copy_from_slice(&full[1..]);
    out
}

/// Parse a 64-byte (x || y) public key.
pub fn pubkey_from_bytes(bytes: &[u8]) -> Result<PublicKey> {
    if bytes.len() != PUBKEY_LEN {
        return Err(RlpxTrustError::InvalidKey(format!(
            "public key must be {PUBKEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    let mut full = [0u8; PUBKEY_LEN + 1];
    full[0] = 0x04;
    full[1..].copy_from_slice(bytes);
    PublicKey::from_slice(&full).map_err(|e| RlpxTrustError::InvalidKey(format!("{e}")))
}
