// Running frame MAC: a Keccak-256 state whose updates are mixed through AES-256.
//
//   header:  update(AES(digest[..16]) ^ header_ct)         -> digest[..16]
//   body:    update(body_ct); s = digest[..16]
//            update(AES(s) ^ s)                             -> digest[..16]

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes256;
use sha3::{Digest, Keccak256};

/// Length of a header or body MAC on the wire.
pub const MAC_LEN: usize = 16;

/// One direction's running MAC.
pub struct MacState {
    hash: Keccak256,
    cipher: Aes256,
}

impl MacState {
    /// Wrap a seeded Keccak state; `mac_secret` keys the block cipher.
    pub fn new(hash: Keccak256, mac_secret: &[u8; 32]) -> Self {
        Self {
            hash,
            cipher: Aes256::new(GenericArray::from_slice(mac_secret)),
        }
    }

    /// The first 16 bytes of the current Keccak digest.
    pub fn digest(&self) -> [u8; MAC_LEN] {
        let full = self.hash.clone().finalize();
        let mut out = [0u8; MAC_LEN];
        out.copy_from_slice(&full[..MAC_LEN]);
        out
    }

    /// Absorb an encrypted frame header and return the header MAC.
    pub fn update_header(&mut self, header_ciphertext: &[u8; 16]) -> [u8; MAC_LEN] {
        let seed = self.digest();
        self.mix(&seed, header_ciphertext)
    }

    /// Absorb an encrypted (padded) frame body and return the body MAC.
    pub fn update_body(&mut self, body_ciphertext: &[u8]) -> [u8; MAC_LEN] {
        self.hash.update(body_ciphertext);
        let seed = self.digest();
        self.mix(&seed, &seed)
    }

    fn mix(&mut self, seed: &[u8; MAC_LEN], data: &[u8; MAC_LEN]) -> [u8; MAC_LEN] {
        let mut block = GenericArray::clone_from_slice(seed);
        self.cipher.encrypt_block(&mut block);
        for (b, d) in block.iter_mut().zip(data.iter()) {
            *b ^= d;
        }
        self.hash.update(block);
        self.digest()
    }
}

impl std::fmt::Debug for MacState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacState").finish_non_exhaustive()
    }
}
