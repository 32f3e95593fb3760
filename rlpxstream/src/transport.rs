// Frame transport over an established byte stream.
//
// `Transport` owns both directions; `split()` hands out a `FrameReader` and a
// `FrameWriter` that can live in separate tasks. Each half is strictly
// sequential: a frame is fully written (or read) before the next one starts.

use bytes::{Bytes, BytesMut};
use rlpxtrust::{Node, Secrets};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::config::TransportConfig;
use crate::error::{Result, RlpxStreamError};
use crate::frame::{frame_codec, FrameEgress, FrameHeader, FrameIngress, HeaderData, HEADER_WIRE_LEN};
use crate::message::Message;

/// An authenticated, encrypted frame stream to one remote node.
#[derive(Debug)]
pub struct Transport<S> {
    remote: Node,
    reader: FrameReader<ReadHalf<S>>,
    writer: FrameWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport<S> {
    /// Wrap `stream` with the frame codec keyed by handshake `secrets`.
    pub fn new(stream: S, secrets: Secrets, remote: Node, config: &TransportConfig) -> Self {
        let (egress, ingress) = frame_codec(secrets, config.max_frame_size);
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            remote,
            reader: FrameReader::new(read_half, ingress),
            writer: FrameWriter::new(write_half, egress),
        }
    }

    pub fn remote(&self) -> &Node {
        &self.remote
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.writer.write_frame(payload).await
    }

    pub async fn write_frame_with(&mut self, data: &HeaderData, payload: &[u8]) -> Result<()> {
        self.writer.write_frame_with(data, payload).await
    }

    pub async fn read_frame(&mut self) -> Result<Bytes> {
        self.reader.read_frame().await
    }

    pub async fn read_frame_with_header(&mut self) -> Result<(FrameHeader, Bytes)> {
        self.reader.read_frame_with_header().await
    }

    pub async fn send_message(&mut self, id: u64, data: &[u8]) -> Result<()> {
        self.writer.send_message(id, data).await
    }

    pub async fn recv_message(&mut self) -> Result<Message> {
        self.reader.recv_message().await
    }

    /// Flush and shut down the write side of the stream.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }

    /// Separate the two directions.
    pub fn split(self) -> (FrameReader<ReadHalf<S>>, FrameWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}

// ── Reader ───────────────────────────────────────────────────────────────

/// Receiving half of a transport.
#[derive(Debug)]
pub struct FrameReader<R> {
    io: R,
    ingress: FrameIngress,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(io: R, ingress: FrameIngress) -> Self {
        Self { io, ingress }
    }

    pub fn is_poisoned(&self) -> bool {
        self.ingress.is_poisoned()
    }

    /// Read one frame and return its payload.
    pub async fn read_frame(&mut self) -> Result<Bytes> {
        let (_, payload) = self.read_frame_with_header().await?;
        Ok(payload)
    }

    /// Read one frame and return its header alongside the payload.
    pub async fn read_frame_with_header(&mut self) -> Result<(FrameHeader, Bytes)> {
        if self.ingress.is_poisoned() {
            return Err(RlpxStreamError::Poisoned { direction: "ingress" });
        }

        let mut head = [0u8; HEADER_WIRE_LEN];
        self.read_exact(&mut head).await?;
        let header = self.ingress.open_header(&head)?;

        let mut body = BytesMut::zeroed(header.body_wire_len());
        self.read_exact(&mut body).await?;
        let payload = self.ingress.open_body(&header, body)?;
        tracing::trace!(size = header.body_size, "frame received");
        Ok((header, payload))
    }

    pub async fn recv_message(&mut self) -> Result<Message> {
        let payload = self.read_frame().await?;
        Message::decode(payload)
    }

    // A short read leaves the keystream and MAC out of step with the peer.
    async fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if let Err(e) = self.io.read_exact(buf).await {
            self.ingress.poison();
            return Err(map_io(e));
        }
        Ok(())
    }
}

// ── Writer ───────────────────────────────────────────────────────────────

/// Sending half of a transport.
#[derive(Debug)]
pub struct FrameWriter<W> {
    io: W,
    egress: FrameEgress,
    poisoned: bool,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(io: W, egress: FrameEgress) -> Self {
        Self {
            io,
            egress,
            poisoned: false,
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Write one frame with default header data.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.write_frame_with(&HeaderData::default(), payload).await
    }

    pub async fn write_frame_with(&mut self, data: &HeaderData, payload: &[u8]) -> Result<()> {
        if self.poisoned {
            return Err(RlpxStreamError::Poisoned { direction: "egress" });
        }
        let wire = self.egress.seal(data, payload)?;
        // The MAC state has advanced; a partial write cannot be retried.
        if let Err(e) = self.write_all(&wire).await {
            self.poisoned = true;
            return Err(map_io(e));
        }
        tracing::trace!(size = payload.len(), "frame sent");
        Ok(())
    }

    pub async fn send_message(&mut self, id: u64, data: &[u8]) -> Result<()> {
        let body = Message::encode(id, data);
        self.write_frame(&body).await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.io.shutdown().await?;
        Ok(())
    }

    async fn write_all(&mut self, wire: &[u8]) -> std::io::Result<()> {
        self.io.write_all(wire).await?;
        self.io.flush().await
    }
}

fn map_io(e: std::io::Error) -> RlpxStreamError {
    match e.kind() {
        std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::ConnectionReset => RlpxStreamError::ConnectionClosed,
        _ => RlpxStreamError::Io(e),
    }
}
