// ECIES over secp256k1 as used by the RLPx handshake.
//
//   ciphertext = 0x04 || R (64) || IV (16) || AES-128-CTR(k_e, IV, m) || HMAC-SHA256(k_m, IV || c || s2) (32)
//
// with k_e || k' = ConcatKDF-SHA256(ECDH_x(r, K)) and k_m = SHA256(k').

use aes::cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use rand::RngCore;
use secp256k1::{PublicKey, SecretKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::hash::{concat_kdf, hash_sha256};
use crate::crypto::keys::{ecdh_agree, EphemeralKey};
use crate::error::{Result, RlpxTrustError};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

const PUBLIC_LEN: usize = 65;
const IV_LEN: usize = 16;
const TAG_LEN: usize = 32;

/// Bytes ECIES adds on top of the plaintext.
pub const ECIES_OVERHEAD: usize = PUBLIC_LEN + IV_LEN + TAG_LEN;

/// Encrypt `plaintext` to `recipient`, authenticating `shared_mac_data` alongside.
pub fn encrypt(plaintext: &[u8], recipient: &PublicKey, shared_mac_data: &[u8]) -> Result<Vec<u8>> {
    let ephemeral = EphemeralKey::generate();
    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);
    encrypt_with(plaintext, recipient, shared_mac_data, &ephemeral, &iv)
}

/// Encrypt with caller-supplied ephemeral key and IV.
pub fn encrypt_with(
    plaintext: &[u8],
    recipient: &PublicKey,
    shared_mac_data: &[u8],
    ephemeral: &EphemeralKey,
    iv: &[u8; IV_LEN],
) -> Result<Vec<u8>> {
    let z = Zeroizing::new(ephemeral.agree(recipient)?);
    let (enc_key, mac_key) = derive_keys(&z);

    let mut out = Vec::with_capacity(plaintext.len() + ECIES_OVERHEAD);
    out.extend_from_slice(&ephemeral.public_key().serialize_uncompressed());
    out.extend_from_slice(iv);
    let body_start = out.len();
    out.extend_from_slice(plaintext);

    let mut cipher = Aes128Ctr::new(&(*enc_key).into(), &(*iv).into());
    cipher.apply_keystream(&mut out[body_start..]);

    let mac_tag = tag(&mac_key, &out[PUBLIC_LEN..], shared_mac_data)?;
    out.extend_from_slice(&mac_tag);
    Ok(out)
}

/// Decrypt an ECIES ciphertext addressed to `secret`.
///
/// The tag is checked before any plaintext is produced.
pub fn decrypt(ciphertext: &[u8], secret: &SecretKey, shared_mac_data: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < ECIES_OVERHEAD {
        return Err(RlpxTrustError::Decryption(format!(
            "ciphertext too short: {} bytes, need at least {ECIES_OVERHEAD}",
            ciphertext.len()
        )));
    }
    if ciphertext[0] != 0x04 {
        return Err(RlpxTrustError::Decryption(format!(
            "unexpected public key prefix 0x{:02x}",
            ciphertext[0]
        )));
    }

    let ephemeral = PublicKey::from_slice(&ciphertext[..PUBLIC_LEN])
        .map_err(|_| RlpxTrustError::Decryption("invalid ephemeral public key".into()))?;
    let z = Zeroizing::new(ecdh_agree(secret, &ephemeral));
    let (enc_key, mac_key) = derive_keys(&z);

    let tag_start = ciphertext.len() - TAG_LEN;
    let authenticated = &ciphertext[PUBLIC_LEN..tag_start];

    let mut mac = HmacSha256::new_from_slice(&mac_key[..])
        .map_err(|e| RlpxTrustError::Decryption(format!("hmac init: {e}")))?;
    mac.update(authenticated);
    mac.update(shared_mac_data);
    mac.verify_slice(&ciphertext[tag_start..])
        .map_err(|_| RlpxTrustError::Decryption("tag mismatch".into()))?;

    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&authenticated[..IV_LEN]);
    let mut plaintext = authenticated[IV_LEN..].to_vec();
    let mut cipher = Aes128Ctr::new(&(*enc_key).into(), &iv.into());
    cipher.apply_keystream(&mut plaintext);
    Ok(plaintext)
}

fn derive_keys(z: &[u8; 32]) -> (Zeroizing<[u8; 16]>, Zeroizing<[u8; 32]>) {
    let mut key = Zeroizing::new([0u8; 32]);
    concat_kdf(z, &mut key[..]);
    let mut enc_key = Zeroizing::new([0u8; 16]);
    enc_key.copy_from_slice(&key[..16]);
    let mac_key = Zeroizing::new(hash_sha256(&key[16..]));
    (enc_key, mac_key)
}

fn tag(mac_key: &[u8; 32], iv_and_body: &[u8], shared_mac_data: &[u8]) -> Result<[u8; TAG_LEN]> {
    let mut mac = HmacSha256::new_from_slice(mac_key)
        .map_err(|e| RlpxTrustError::Decryption(format!("hmac init: {e}")))?;
    mac.update(iv_and_body);
    mac.update(shared_mac_data);
    Ok(mac.finalize().into_bytes().into())
}
