// Cryptographic hashing: Keccak-256, SHA-256 and the NIST concat KDF.

use sha2::Sha256;
use sha3::{Digest, Keccak256};

/// Keccak-256 (the pre-standard SHA-3 padding used throughout RLPx).
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    keccak256_concat(&[data])
}

/// Keccak-256 over the concatenation of `parts`.
pub fn keccak256_concat(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// SHA-256 hash of `data`, returning a 32-byte digest.
pub fn hash_sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// NIST SP 800-56 concatenation KDF over SHA-256 with empty other-info.
///
/// ```text
/// K = SHA256(be32(1) || z) || SHA256(be32(2) || z) || ...
/// ```
pub fn concat_kdf(z: &[u8], out: &mut [u8]) {
    let mut counter: u32 = 1;
    for chunk in out.chunks_mut(32) {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_be_bytes());
        hasher.update(z);
        let block = hasher.finalize();
        chunk.copy_from_slice(&block[..chunk.len()]);
        counter += 1;
    }
}

/// Byte-wise XOR of two 32-byte values.
pub fn xor32(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b.iter())) {
        *o = x ^ y;
    }
    out
}
