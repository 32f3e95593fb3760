// Message framing: each frame body is rlp(message_id) followed by the data.

use bytes::{Bytes, BytesMut};
use rlpxtrust::rlp;

use crate::error::{Result, RlpxStreamError};

const LIST_PREFIX: u8 = 0xc0;

/// One application message carried in a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    pub data: Bytes,
}

impl Message {
    pub fn new(id: u64, data: impl Into<Bytes>) -> Self {
        Self {
            id,
            data: data.into(),
        }
    }

    /// Encode a frame body for `id` and `data`.
    pub fn encode(id: u64, data: &[u8]) -> BytesMut {
        let mut body = BytesMut::with_capacity(9 + data.len());
        rlp::encode_u64(&mut body, id);
        body.extend_from_slice(data);
        body
    }

    /// Split a frame body into its id and data. The data shares `body`'s buffer.
    pub fn decode(body: Bytes) -> Result<Self> {
        if let Some(&prefix) = body.first() {
            if prefix >= LIST_PREFIX {
                return Err(RlpxStreamError::MalformedFrame(
                    "message id is an RLP list".into(),
                ));
            }
        }
        let (item, rest) =
            rlp::decode(&body).map_err(|e| RlpxStreamError::MalformedFrame(e.to_string()))?;
        let id = item
            .as_u64()
            .map_err(|e| RlpxStreamError::MalformedFrame(format!("message id: {e}")))?;
        let offset = body.len() - rest.len();
        Ok(Self {
            id,
            data: body.slice(offset..),
        })
    }
}
