// Auth and auth-ack messages exchanged during the RLPx handshake.
//
// Two wire formats share one decode path:
//
//   legacy  ECIES(plaintext) with a fixed length (auth 307, ack 210 bytes)
//   EIP-8   be16(size) || ECIES(rlp(list) || padding), the size prefix
//           authenticated as ECIES shared MAC data
//
// Decoders try the legacy layout first and fall back to EIP-8.

use rand::{Rng, RngCore};
use secp256k1::{PublicKey, SecretKey};
use zeroize::Zeroizing;

use crate::crypto::ecies::{self, ECIES_OVERHEAD};
use crate::crypto::hash::{keccak256, xor32};
use crate::crypto::keys::{
    ecdh_agree, pubkey_from_bytes, pubkey_to_bytes, recover_public_key, PUBKEY_LEN,
    SIGNATURE_LEN,
};
use crate::error::{Result, RlpxTrustError};
use crate::rlp::{self, ListBuilder};

/// Protocol version advertised in auth and ack bodies.
pub const PROTOCOL_VERSION: u64 = 4;

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 32;

/// Legacy auth plaintext: `sig || keccak(eph_pub) || static_pub || nonce || flag`.
pub const AUTH_PLAINTEXT_LEN: usize = SIGNATURE_LEN + 32 + PUBKEY_LEN + NONCE_LEN + 1;

/// Legacy ack plaintext: `eph_pub || nonce || flag`.
pub const ACK_PLAINTEXT_LEN: usize = PUBKEY_LEN + NONCE_LEN + 1;

/// Legacy auth ciphertext length, also the minimum read before probing.
pub const AUTH_LEN: usize = AUTH_PLAINTEXT_LEN + ECIES_OVERHEAD;

/// Legacy ack ciphertext length.
pub const ACK_LEN: usize = ACK_PLAINTEXT_LEN + ECIES_OVERHEAD;

const SIZE_PREFIX_LEN: usize = 2;
const EIP8_PADDING_MIN: usize = 100;
const EIP8_PADDING_MAX: usize = 250;
const TOKEN_FLAG: u8 = 0x00;
/// First byte of every ECIES ciphertext (uncompressed point tag).
const ECIES_POINT_TAG: u8 = 0x04;

/// Which wire encoding a handshake message used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    Legacy,
    Eip8,
}

impl WireFormat {
    pub fn from_eip8_flag(use_eip8: bool) -> Self {
        if use_eip8 {
            WireFormat::Eip8
        } else {
            WireFormat::Legacy
        }
    }

    pub fn is_eip8(self) -> bool {
        self == WireFormat::Eip8
    }

    pub fn label(self) -> &'static str {
        match self {
            WireFormat::Legacy => "legacy",
            WireFormat::Eip8 => "eip8",
        }
    }
}

/// Result of inspecting a possibly incomplete handshake message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe<T> {
    /// The message decoded successfully.
    Decoded(T),
    /// An EIP-8 message whose size prefix declares this many further bytes.
    NeedMore(usize),
}

// ── Auth ─────────────────────────────────────────────────────────────────

/// Contents of an auth message before encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthBody {
    /// Recoverable signature by the ephemeral key over `ECDH(static) ^ nonce`.
    pub signature: [u8; SIGNATURE_LEN],
    /// The initiator's static public key.
    pub static_pubkey: PublicKey,
    pub nonce: [u8; NONCE_LEN],
    pub version: u64,
}

impl AuthBody {
    /// Serialize in the legacy fixed layout.
    ///
    /// The ephemeral key is not carried directly, only its hash; the receiver
    /// recovers it from the signature.
    pub fn encode_legacy(&self, ephemeral_pubkey: &PublicKey) -> Vec<u8> {
        let mut out = Vec::with_capacity(AUTH_PLAINTEXT_LEN);
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&keccak256(&pubkey_to_bytes(ephemeral_pubkey)));
        out.extend_from_slice(&pubkey_to_bytes(&self.static_pubkey));
        out.extend_from_slice(&self.nonce);
        out.push(TOKEN_FLAG);
        out
    }

    /// Serialize as `rlp([sig, static_pub, nonce, version]) || padding`.
    pub fn encode_eip8(&self) -> Vec<u8> {
        let list = ListBuilder::new()
            .bytes(&self.signature)
            .bytes(&pubkey_to_bytes(&self.static_pubkey))
            .bytes(&self.nonce)
            .uint(self.version)
            .finish();
        with_padding(&list)
    }

    fn decode_legacy(plain: &[u8]) -> Result<(Self, [u8; 32])> {
        if plain.len() != AUTH_PLAINTEXT_LEN {
            return Err(RlpxTrustError::malformed(format!(
                "legacy auth must be {AUTH_PLAINTEXT_LEN} bytes, got {}",
                plain.len()
            )));
        }
        let (signature, rest) = plain.split_at(SIGNATURE_LEN);
        let (ephemeral_hash, rest) = rest.split_at(32);
        let (static_pubkey, rest) = rest.split_at(PUBKEY_LEN);
        let (nonce, _flag) = rest.split_at(NONCE_LEN);

        let body = AuthBody {
            signature: to_array(signature)?,
            static_pubkey: pubkey_from_bytes(static_pubkey)?,
            nonce: to_array(nonce)?,
            version: PROTOCOL_VERSION,
        };
        Ok((body, to_array(ephemeral_hash)?))
    }

    fn decode_eip8(plain: &[u8]) -> Result<Self> {
        let (item, _padding) = rlp::decode(plain)?;
        let fields = item.as_list()?;
        if fields.len() < 4 {
            return Err(RlpxTrustError::malformed(format!(
                "EIP-8 auth needs 4 fields, got {}",
                fields.len()
            )));
        }
        Ok(AuthBody {
            signature: fields[0].as_array()?,
            static_pubkey: pubkey_from_bytes(fields[1].as_bytes()?)?,
            nonce: fields[2].as_array()?,
            version: fields[3].as_u64()?,
        })
    }
}

/// A decoded auth message with the initiator's ephemeral key recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAuth {
    pub ephemeral_pubkey: PublicKey,
    pub static_pubkey: PublicKey,
    pub nonce: [u8; NONCE_LEN],
    pub version: u64,
    pub format: WireFormat,
}

/// The message hash signed by the initiator's ephemeral key.
pub fn auth_signature_hash(
    static_secret: &SecretKey,
    remote_static: &PublicKey,
    nonce: &[u8; NONCE_LEN],
) -> [u8; 32] {
    let shared = Zeroizing::new(ecdh_agree(static_secret, remote_static));
    xor32(&shared, nonce)
}

fn recover_auth(
    body: AuthBody,
    ephemeral_hash: Option<[u8; 32]>,
    own_secret: &SecretKey,
    format: WireFormat,
) -> Result<DecodedAuth> {
    let msg_hash = auth_signature_hash(own_secret, &body.static_pubkey, &body.nonce);
    let ephemeral_pubkey = recover_public_key(&body.signature, &msg_hash)?;
    if let Some(expected) = ephemeral_hash {
        if keccak256(&pubkey_to_bytes(&ephemeral_pubkey)) != expected {
            return Err(RlpxTrustError::malformed(
                "ephemeral key hash does not match recovered key",
            ));
        }
    }
    Ok(DecodedAuth {
        ephemeral_pubkey,
        static_pubkey: body.static_pubkey,
        nonce: body.nonce,
        version: body.version,
        format,
    })
}

/// Decode an auth message from a buffer that may not yet hold all of it.
///
/// `head` must hold at least [`AUTH_LEN`] bytes to be conclusive; shorter
/// input reports how many bytes are still missing.
pub fn probe_authentication(head: &[u8], own_secret: &SecretKey) -> Result<Probe<DecodedAuth>> {
    probe_auth_with(head, own_secret, false)
}

fn probe_auth_with(
    head: &[u8],
    own_secret: &SecretKey,
    complete: bool,
) -> Result<Probe<DecodedAuth>> {
    probe(
        head,
        own_secret,
        AUTH_LEN,
        complete,
        |plain| {
            let (body, ephemeral_hash) = AuthBody::decode_legacy(plain)?;
            recover_auth(body, Some(ephemeral_hash), own_secret, WireFormat::Legacy)
        },
        |plain| {
            let body = AuthBody::decode_eip8(plain)?;
            recover_auth(body, None, own_secret, WireFormat::Eip8)
        },
    )
}

/// Decode a complete auth ciphertext in either format.
pub fn decode_authentication(ciphertext: &[u8], own_secret: &SecretKey) -> Result<DecodedAuth> {
    if ciphertext.len() < AUTH_LEN {
        return Err(RlpxTrustError::malformed(format!(
            "auth ciphertext too short: {} bytes, need at least {AUTH_LEN}",
            ciphertext.len()
        )));
    }
    conclusive(probe_auth_with(ciphertext, own_secret, true)?)
}

// ── Ack ──────────────────────────────────────────────────────────────────

/// Contents of an auth-ack message before encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckBody {
    pub ephemeral_pubkey: PublicKey,
    pub nonce: [u8; NONCE_LEN],
    pub version: u64,
}

impl AckBody {
    pub fn encode_legacy(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(ACK_PLAINTEXT_LEN);
        out.extend_from_slice(&pubkey_to_bytes(&self.ephemeral_pubkey));
        out.extend_from_slice(&self.nonce);
        out.push(TOKEN_FLAG);
        out
    }

    pub fn encode_eip8(&self) -> Vec<u8> {
        let list = ListBuilder::new()
            .bytes(&pubkey_to_bytes(&self.ephemeral_pubkey))
            .bytes(&self.nonce)
            .uint(self.version)
            .finish();
        with_padding(&list)
    }

    fn decode_legacy(plain: &[u8]) -> Result<Self> {
        if plain.len() != ACK_PLAINTEXT_LEN {
            return Err(RlpxTrustError::malformed(format!(
                "legacy ack must be {ACK_PLAINTEXT_LEN} bytes, got {}",
                plain.len()
            )));
        }
        let (ephemeral_pubkey, rest) = plain.split_at(PUBKEY_LEN);
        Ok(AckBody {
            ephemeral_pubkey: pubkey_from_bytes(ephemeral_pubkey)?,
            nonce: to_array(&rest[..NONCE_LEN])?,
            version: PROTOCOL_VERSION,
        })
    }

    fn decode_eip8(plain: &[u8]) -> Result<Self> {
        let (item, _padding) = rlp::decode(plain)?;
        let fields = item.as_list()?;
        if fields.len() < 3 {
            return Err(RlpxTrustError::malformed(format!(
                "EIP-8 ack needs 3 fields, got {}",
                fields.len()
            )));
        }
        Ok(AckBody {
            ephemeral_pubkey: pubkey_from_bytes(fields[0].as_bytes()?)?,
            nonce: fields[1].as_array()?,
            version: fields[2].as_u64()?,
        })
    }
}

/// A decoded auth-ack message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAck {
    pub ephemeral_pubkey: PublicKey,
    pub nonce: [u8; NONCE_LEN],
    pub version: u64,
    pub format: WireFormat,
}

impl DecodedAck {
    fn new(body: AckBody, format: WireFormat) -> Self {
        DecodedAck {
            ephemeral_pubkey: body.ephemeral_pubkey,
            nonce: body.nonce,
            version: body.version,
            format,
        }
    }
}

/// Decode an auth-ack from a buffer that may not yet hold all of it.
pub fn probe_auth_ack(head: &[u8], own_secret: &SecretKey) -> Result<Probe<DecodedAck>> {
    probe_ack_with(head, own_secret, false)
}

fn probe_ack_with(head: &[u8], own_secret: &SecretKey, complete: bool) -> Result<Probe<DecodedAck>> {
    probe(
        head,
        own_secret,
        ACK_LEN,
        complete,
        |plain| Ok(DecodedAck::new(AckBody::decode_legacy(plain)?, WireFormat::Legacy)),
        |plain| Ok(DecodedAck::new(AckBody::decode_eip8(plain)?, WireFormat::Eip8)),
    )
}

/// Decode a complete auth-ack ciphertext in either format.
pub fn decode_auth_ack(ciphertext: &[u8], own_secret: &SecretKey) -> Result<DecodedAck> {
    if ciphertext.len() < ACK_LEN {
        return Err(RlpxTrustError::malformed(format!(
            "ack ciphertext too short: {} bytes, need at least {ACK_LEN}",
            ciphertext.len()
        )));
    }
    conclusive(probe_ack_with(ciphertext, own_secret, true)?)
}

// ── Encryption ───────────────────────────────────────────────────────────

/// Encrypt a serialized body to `recipient` in the given format.
///
/// For EIP-8 the size prefix is computed before encryption and fed to ECIES
/// as shared MAC data, then prepended to the ciphertext.
pub fn seal(plaintext: &[u8], format: WireFormat, recipient: &PublicKey) -> Result<Vec<u8>> {
    match format {
        WireFormat::Legacy => ecies::encrypt(plaintext, recipient, &[]),
        WireFormat::Eip8 => {
            let size = u16::try_from(plaintext.len() + ECIES_OVERHEAD).map_err(|_| {
                RlpxTrustError::malformed(format!(
                    "EIP-8 body of {} bytes exceeds the size prefix",
                    plaintext.len()
                ))
            })?;
            let prefix = size.to_be_bytes();
            let ciphertext = ecies::encrypt(plaintext, recipient, &prefix)?;
            let mut out = Vec::with_capacity(SIZE_PREFIX_LEN + ciphertext.len());
            out.extend_from_slice(&prefix);
            out.extend_from_slice(&ciphertext);
            Ok(out)
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn probe<T>(
    head: &[u8],
    own_secret: &SecretKey,
    legacy_len: usize,
    complete: bool,
    parse_legacy: impl FnOnce(&[u8]) -> Result<T>,
    parse_eip8: impl FnOnce(&[u8]) -> Result<T>,
) -> Result<Probe<T>> {
    if head.len() < legacy_len {
        return Ok(Probe::NeedMore(legacy_len - head.len()));
    }

    let legacy_err = match ecies::decrypt(&head[..legacy_len], own_secret, &[])
        .and_then(|plain| parse_legacy(&plain))
    {
        Ok(decoded) => return Ok(Probe::Decoded(decoded)),
        Err(e) => e,
    };
    tracing::trace!(error = %legacy_err, "not a legacy handshake message, trying EIP-8");

    let eip8 = probe_eip8(head, own_secret, parse_eip8);
    // A whole buffer opening with the ECIES point tag was a legacy message;
    // its prefix read as an EIP-8 size is meaningless.
    let legacy_shaped = head[0] == ECIES_POINT_TAG;
    match eip8 {
        Ok(Probe::NeedMore(_)) | Err(_) if complete && legacy_shaped => Err(legacy_err),
        other => other,
    }
}

fn probe_eip8<T>(
    head: &[u8],
    own_secret: &SecretKey,
    parse_eip8: impl FnOnce(&[u8]) -> Result<T>,
) -> Result<Probe<T>> {
    let (prefix, rest) = head.split_at(SIZE_PREFIX_LEN);
    let size = usize::from(u16::from_be_bytes([prefix[0], prefix[1]]));
    if rest.len() < size {
        return Ok(Probe::NeedMore(size - rest.len()));
    }
    let plain = ecies::decrypt(&rest[..size], own_secret, prefix)?;
    parse_eip8(&plain).map(Probe::Decoded)
}

fn conclusive<T>(probe: Probe<T>) -> Result<T> {
    match probe {
        Probe::Decoded(decoded) => Ok(decoded),
        Probe::NeedMore(missing) => Err(RlpxTrustError::malformed(format!(
            "truncated EIP-8 message: {missing} bytes missing"
        ))),
    }
}

fn with_padding(list: &[u8]) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    let pad_len = rng.gen_range(EIP8_PADDING_MIN..=EIP8_PADDING_MAX);
    let mut out = Vec::with_capacity(list.len() + pad_len);
    out.extend_from_slice(list);
    out.resize(list.len() + pad_len, 0);
    rng.fill_bytes(&mut out[list.len()..]);
    out
}

fn to_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| RlpxTrustError::malformed(format!("expected {N} bytes, got {}", bytes.len())))
}
