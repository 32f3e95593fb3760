//! Minimal RLP (recursive length prefix) codec.
//!
//! Covers what the handshake and frame headers need: byte strings, unsigned
//! integers and (nested) lists. Decoding is prefix-based: [`decode`] returns
//! the first item and the unconsumed tail, so EIP-8 padding after the list and
//! additional list elements from newer protocol versions are tolerated by the
//! callers rather than rejected here.
//!
//! ```text
//! 0x00..=0x7f   single byte, itself
//! 0x80..=0xb7   string, length = prefix - 0x80
//! 0xb8..=0xbf   string, length-of-length = prefix - 0xb7
//! 0xc0..=0xf7   list, payload length = prefix - 0xc0
//! 0xf8..=0xff   list, length-of-length = prefix - 0xf7
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::{Result, RlpxTrustError};

const STRING_OFFSET: u8 = 0x80;
const LIST_OFFSET: u8 = 0xc0;
const SHORT_MAX: usize = 55;

/// Deepest list nesting [`decode`] accepts. Handshake bodies and frame
/// headers are flat lists.
pub const MAX_DEPTH: usize = 16;

/// A decoded RLP item borrowing from the input buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item<'a> {
    Bytes(&'a [u8]),
    List(Vec<Item<'a>>),
}

impl<'a> Item<'a> {
    pub fn as_bytes(&self) -> Result<&'a [u8]> {
        match self {
            Item::Bytes(b) => Ok(b),
            Item::List(_) => Err(RlpxTrustError::malformed("expected RLP string, found list")),
        }
    }

    pub fn as_list(&self) -> Result<&[Item<'a>]> {
        match self {
            Item::List(items) => Ok(items),
            Item::Bytes(_) => Err(RlpxTrustError::malformed("expected RLP list, found string")),
        }
    }

    /// Interpret a string item as a big-endian unsigned integer.
    pub fn as_u64(&self) -> Result<u64> {
        let bytes = self.as_bytes()?;
        if bytes.len() > 8 {
            return Err(RlpxTrustError::malformed(format!(
                "integer too wide: {} bytes",
                bytes.len()
            )));
        }
        if bytes.first() == Some(&0) {
            return Err(RlpxTrustError::malformed("integer has leading zero byte"));
        }
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// A string item that must be exactly `N` bytes long.
    pub fn as_array<const N: usize>(&self) -> Result<[u8; N]> {
        let bytes = self.as_bytes()?;
        bytes.try_into().map_err(|_| {
            RlpxTrustError::malformed(format!("expected {N}-byte string, got {}", bytes.len()))
        })
    }
}

/// Decode the first item of `input`, returning it and the remaining bytes.
pub fn decode(input: &[u8]) -> Result<(Item<'_>, &[u8])> {
    decode_at(input, 0)
}

fn decode_at(input: &[u8], depth: usize) -> Result<(Item<'_>, &[u8])> {
    let (&prefix, rest) = input
        .split_first()
        .ok_or_else(|| RlpxTrustError::malformed("empty RLP input"))?;

    match prefix {
        0x00..=0x7f => Ok((Item::Bytes(&input[..1]), rest)),
        0x80..=0xbf => {
            let (payload, tail) = read_payload(prefix, STRING_OFFSET, rest)?;
            if payload.len() == 1 && payload[0] < STRING_OFFSET {
                return Err(RlpxTrustError::malformed(
                    "single byte below 0x80 must not carry a string prefix",
                ));
            }
            Ok((Item::Bytes(payload), tail))
        }
        0xc0..=0xff => {
            if depth >= MAX_DEPTH {
                return Err(RlpxTrustError::malformed(format!(
                    "RLP lists nested deeper than {MAX_DEPTH}"
                )));
            }
            let (mut payload, tail) = read_payload(prefix, LIST_OFFSET, rest)?;
            let mut items = Vec::new();
            while !payload.is_empty() {
                let (item, next) = decode_at(payload, depth + 1)?;
                items.push(item);
                payload = next;
            }
            Ok((Item::List(items), tail))
        }
    }
}

fn read_payload(prefix: u8, offset: u8, rest: &[u8]) -> Result<(&[u8], &[u8])> {
    let short = usize::from(prefix - offset);
    let (len, body) = if short <= SHORT_MAX {
        (short, rest)
    } else {
        let len_of_len = short - SHORT_MAX;
        if rest.len() < len_of_len {
            return Err(RlpxTrustError::malformed("truncated RLP length"));
        }
        let (len_bytes, body) = rest.split_at(len_of_len);
        if len_bytes[0] == 0 {
            return Err(RlpxTrustError::malformed("RLP length has leading zero byte"));
        }
        if len_of_len > std::mem::size_of::<usize>() {
            return Err(RlpxTrustError::malformed("RLP length overflows usize"));
        }
        let len = len_bytes
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        if len <= SHORT_MAX {
            return Err(RlpxTrustError::malformed("non-canonical long RLP length"));
        }
        (len, body)
    };
    if body.len() < len {
        return Err(RlpxTrustError::malformed(format!(
            "RLP item declares {len} bytes, only {} available",
            body.len()
        )));
    }
    Ok(body.split_at(len))
}

// ── Encoding ─────────────────────────────────────────────────────────────

pub(crate) fn put_header(buf: &mut impl BufMut, offset: u8, len: usize) {
    if len <= SHORT_MAX {
        buf.put_u8(offset + len as u8);
    } else {
        let be = (len as u64).to_be_bytes();
        let skip = be.iter().take_while(|b| **b == 0).count();
        buf.put_u8(offset + SHORT_MAX as u8 + (be.len() - skip) as u8);
        buf.put_slice(&be[skip..]);
    }
}

/// Append `data` as an RLP string.
pub fn encode_bytes(buf: &mut impl BufMut, data: &[u8]) {
    if data.len() == 1 && data[0] < STRING_OFFSET {
        buf.put_u8(data[0]);
    } else {
        put_header(buf, STRING_OFFSET, data.len());
        buf.put_slice(data);
    }
}

/// Append `value` as a minimal big-endian RLP integer (zero is the empty string).
pub fn encode_u64(buf: &mut impl BufMut, value: u64) {
    let be = value.to_be_bytes();
    let skip = be.iter().take_while(|b| **b == 0).count();
    encode_bytes(buf, &be[skip..]);
}

/// Builds an RLP list element by element.
#[derive(Debug, Default)]
pub struct ListBuilder {
    payload: BytesMut,
}

impl ListBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        encode_bytes(&mut self.payload, data);
        self
    }

    pub fn uint(mut self, value: u64) -> Self {
        encode_u64(&mut self.payload, value);
        self
    }

    /// Close the list and return its full encoding.
    pub fn finish(self) -> BytesMut {
        let mut out = BytesMut::with_capacity(self.payload.len() + 9);
        put_header(&mut out, LIST_OFFSET, self.payload.len());
        out.extend_from_slice(&self.payload);
        out
    }
}
