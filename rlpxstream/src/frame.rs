// Frame codec: AES-256-CTR headers and bodies, each followed by a running MAC.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{KeyIvInit, StreamCipher};
use bytes::{BufMut, Bytes, BytesMut};
use rlpxtrust::rlp::{self, ListBuilder};
use rlpxtrust::Secrets;
use subtle::ConstantTimeEq;

use crate::error::{Result, RlpxStreamError};
use crate::mac::{MacState, MAC_LEN};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Encrypted header length on the wire.
pub const HEADER_LEN: usize = 16;

/// Largest body a 24-bit header length can declare.
pub const MAX_FRAME_SIZE: usize = (1 << 24) - 1;

/// Bytes read before the body: header plus header MAC.
pub const HEADER_WIRE_LEN: usize = HEADER_LEN + MAC_LEN;

const LENGTH_LEN: usize = 3;
const BLOCK_LEN: usize = 16;

/// Metadata carried in the frame header after the body length.
///
/// Binary layout of the 16-byte header plaintext:
///
/// ```text
/// +-----------+------------------------------------+---------+
/// | body_len  | rlp([capability_id, context_id?])  | zeroes  |
/// |  (3B BE)  |                                    |         |
/// +-----------+------------------------------------+---------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderData {
    pub capability_id: u64,
    pub context_id: Option<u64>,
}

impl Default for HeaderData {
    /// `[0, 0]`, encoded as `c2 80 80`.
    fn default() -> Self {
        Self {
            capability_id: 0,
            context_id: Some(0),
        }
    }
}

impl HeaderData {
    fn encode(&self) -> BytesMut {
        let list = ListBuilder::new().uint(self.capability_id);
        match self.context_id {
            Some(ctx) => list.uint(ctx).finish(),
            None => list.finish(),
        }
    }

    /// Parse header data, falling back to the default for anything unreadable.
    ///
    /// Peers differ in what they put here and nothing downstream depends on it.
    fn decode(data: &[u8]) -> Self {
        let parsed = rlp::decode(data).and_then(|(item, _)| {
            let fields = item.as_list()?;
            let capability_id = match fields.first() {
                Some(f) => f.as_u64()?,
                None => 0,
            };
            let context_id = fields.get(1).map(|f| f.as_u64()).transpose()?;
            Ok(HeaderData {
                capability_id,
                context_id,
            })
        });
        match parsed {
            Ok(header) => header,
            Err(e) => {
                tracing::trace!(error = %e, "unreadable frame header data, using default");
                HeaderData::default()
            }
        }
    }
}

/// A decrypted and authenticated frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub body_size: usize,
    pub data: HeaderData,
}

impl FrameHeader {
    /// Bytes still to read after the header: padded body plus body MAC.
    pub fn body_wire_len(&self) -> usize {
        padded_len(self.body_size) + MAC_LEN
    }
}

/// Length of `len` rounded up to the next 16-byte block.
pub fn padded_len(len: usize) -> usize {
    len.div_ceil(BLOCK_LEN) * BLOCK_LEN
}

/// Split handshake secrets into the two directions of a frame codec.
pub fn frame_codec(secrets: Secrets, max_frame_size: usize) -> (FrameEgress, FrameIngress) {
    let Secrets {
        aes_secret,
        mac_secret,
        egress_mac,
        ingress_mac,
    } = secrets;
    let max_frame_size = max_frame_size.min(MAX_FRAME_SIZE);
    let key = GenericArray::from_slice(&aes_secret[..]);
    let iv = GenericArray::default();

    let egress = FrameEgress {
        cipher: Aes256Ctr::new(key, &iv),
        mac: MacState::new(egress_mac, &mac_secret),
        max_frame_size,
    };
    let ingress = FrameIngress {
        cipher: Aes256Ctr::new(key, &iv),
        mac: MacState::new(ingress_mac, &mac_secret),
        max_frame_size,
        poisoned: false,
    };
    (egress, ingress)
}

// ── Egress ───────────────────────────────────────────────────────────────

/// Sending half of the frame codec. Frames must be sealed in wire order.
pub struct FrameEgress {
    cipher: Aes256Ctr,
    mac: MacState,
    max_frame_size: usize,
}

impl FrameEgress {
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encrypt and authenticate one frame, returning its wire bytes.
    pub fn seal(&mut self, data: &HeaderData, payload: &[u8]) -> Result<BytesMut> {
        if payload.len() > self.max_frame_size {
            return Err(RlpxStreamError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }

        let mut header = [0u8; HEADER_LEN];
        let len = (payload.len() as u32).to_be_bytes();
        header[..LENGTH_LEN].copy_from_slice(&len[1..]);
        let encoded = data.encode();
        if LENGTH_LEN + encoded.len() > HEADER_LEN {
            return Err(RlpxStreamError::MalformedFrame(format!(
                "header data of {} bytes does not fit the header",
                encoded.len()
            )));
        }
        header[LENGTH_LEN..LENGTH_LEN + encoded.len()].copy_from_slice(&encoded);

        let body_len = padded_len(payload.len());
        let mut out = BytesMut::with_capacity(HEADER_WIRE_LEN + body_len + MAC_LEN);

        self.cipher.apply_keystream(&mut header);
        let header_mac = self.mac.update_header(&header);
        out.put_slice(&header);
        out.put_slice(&header_mac);

        let body_start = out.len();
        out.put_slice(payload);
        out.put_bytes(0, body_len - payload.len());
        self.cipher.apply_keystream(&mut out[body_start..]);
        let body_mac = self.mac.update_body(&out[body_start..]);
        out.put_slice(&body_mac);
        Ok(out)
    }
}

impl std::fmt::Debug for FrameEgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameEgress")
            .field("max_frame_size", &self.max_frame_size)
            .finish_non_exhaustive()
    }
}

// ── Ingress ──────────────────────────────────────────────────────────────

/// Receiving half of the frame codec.
///
/// A MAC failure poisons it: the running state no longer matches the peer's,
/// so every later call fails.
pub struct FrameIngress {
    cipher: Aes256Ctr,
    mac: MacState,
    max_frame_size: usize,
    poisoned: bool,
}

impl FrameIngress {
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Mark the stream unusable, e.g. after a read failed mid-frame.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Verify and decrypt the 32-byte header block.
    pub fn open_header(&mut self, wire: &[u8; HEADER_WIRE_LEN]) -> Result<FrameHeader> {
        self.check_poisoned()?;

        let mut header = [0u8; HEADER_LEN];
        header.copy_from_slice(&wire[..HEADER_LEN]);
        let expected = self.mac.update_header(&header);
        if !bool::from(expected[..].ct_eq(&wire[HEADER_LEN..])) {
            self.poisoned = true;
            tracing::warn!("frame header MAC mismatch, ingress poisoned");
            return Err(RlpxStreamError::MacMismatch { stage: "header" });
        }

        self.cipher.apply_keystream(&mut header);
        let body_size = usize::from(header[0]) << 16 | usize::from(header[1]) << 8 | usize::from(header[2]);
        if body_size > self.max_frame_size {
            // The body will not be consumed, so the stream cannot resync.
            self.poisoned = true;
            return Err(RlpxStreamError::FrameTooLarge {
                size: body_size,
                max: self.max_frame_size,
            });
        }
        Ok(FrameHeader {
            body_size,
            data: HeaderData::decode(&header[LENGTH_LEN..]),
        })
    }

    /// Verify and decrypt the padded body plus MAC that follow `header`.
    pub fn open_body(&mut self, header: &FrameHeader, mut wire: BytesMut) -> Result<Bytes> {
        self.check_poisoned()?;
        if wire.len() != header.body_wire_len() {
            self.poisoned = true;
            return Err(RlpxStreamError::MalformedFrame(format!(
                "body block is {} bytes, header declares {}",
                wire.len(),
                header.body_wire_len()
            )));
        }

        let mac_start = wire.len() - MAC_LEN;
        let expected = self.mac.update_body(&wire[..mac_start]);
        if !bool::from(expected[..].ct_eq(&wire[mac_start..])) {
            self.poisoned = true;
            tracing::warn!(size = header.body_size, "frame body MAC mismatch, ingress poisoned");
            return Err(RlpxStreamError::MacMismatch { stage: "body" });
        }

        wire.truncate(mac_start);
        self.cipher.apply_keystream(&mut wire);
        wire.truncate(header.body_size);
        Ok(wire.freeze())
    }

    /// Open one complete frame from a buffer holding exactly its wire bytes.
    pub fn open(&mut self, frame: &[u8]) -> Result<(FrameHeader, Bytes)> {
        if frame.len() < HEADER_WIRE_LEN {
            return Err(RlpxStreamError::MalformedFrame(format!(
                "frame of {} bytes is shorter than its header",
                frame.len()
            )));
        }
        let mut head = [0u8; HEADER_WIRE_LEN];
        head.copy_from_slice(&frame[..HEADER_WIRE_LEN]);
        let header = self.open_header(&head)?;
        let payload = self.open_body(&header, BytesMut::from(&frame[HEADER_WIRE_LEN..]))?;
        Ok((header, payload))
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(RlpxStreamError::Poisoned { direction: "ingress" });
        }
        Ok(())
    }
}

impl std::fmt::Debug for FrameIngress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameIngress")
            .field("max_frame_size", &self.max_frame_size)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}
