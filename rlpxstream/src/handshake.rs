// Async handshake drivers.
//
// `initiate` and `accept` run the auth/ack exchange over any duplex byte
// stream and hand back a keyed `Transport`. Every read and write races the
// caller's cancellation token and a single deadline covering the whole
// exchange. Dropping the driver future drops the handshake, which zeroizes
// the ephemeral key.

use std::future::Future;
use std::time::Duration;

use rlpxtrust::handshake::messages::{
    probe_auth_ack, probe_authentication, Probe, ACK_LEN, AUTH_LEN,
};
use rlpxtrust::{Address, Initiator, Node, Responder, RlpxTrustError, SecretKey};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::HandshakeConfig;
use crate::error::{Result, RlpxStreamError};
use crate::transport::Transport;

/// A completed handshake: the authenticated remote node and its transport.
#[derive(Debug)]
pub struct Connection<S> {
    pub remote: Node,
    pub transport: Transport<S>,
}

impl<S> Connection<S> {
    pub fn into_transport(self) -> Transport<S> {
        self.transport
    }
}

/// Dial side: send auth to `remote`, read its ack, derive secrets.
pub async fn initiate<S>(
    mut stream: S,
    remote: Node,
    static_key: SecretKey,
    config: &HandshakeConfig,
    cancel: &CancellationToken,
) -> Result<Connection<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let guard = Guard::new(cancel, config.timeout);
    let peer = remote.id().short();
    let fail = |stage: &'static str| {
        let peer = peer.clone();
        move |e: RlpxTrustError| RlpxStreamError::handshake(stage, peer, e)
    };

    let mut initiator = Initiator::new(remote, static_key, config.use_eip8);
    let auth_plain = initiator.create_auth_message().map_err(fail("auth"))?;
    let auth = initiator
        .encrypt_auth_message(&auth_plain)
        .map_err(fail("auth"))?;
    guard.write_all(&mut stream, &auth).await?;
    tracing::debug!(%peer, format = initiator.format().label(), "auth written");

    let (ack, ack_ct) = read_message(&mut stream, &guard, ACK_LEN, "ack", &peer, |head| {
        probe_auth_ack(head, &static_key)
    })
    .await?;
    initiator.record_auth_ack(&ack).map_err(fail("ack"))?;

    let secrets = initiator
        .derive_secrets(&auth, &ack_ct)
        .map_err(fail("derive"))?;
    let remote = initiator.complete().map_err(fail("derive"))?;
    tracing::debug!(%peer, "handshake complete as initiator");

    let transport = Transport::new(stream, secrets, remote.clone(), &config.transport);
    Ok(Connection { remote, transport })
}

/// Listen side: read an auth from an unknown peer, answer in its format.
///
/// The remote identity is learned from the auth; `peer_address` is only
/// attached to the resulting [`Node`].
pub async fn accept<S>(
    mut stream: S,
    peer_address: Address,
    static_key: SecretKey,
    config: &HandshakeConfig,
    cancel: &CancellationToken,
) -> Result<Connection<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let guard = Guard::new(cancel, config.timeout);
    let addr = peer_address.tcp_socket_addr().to_string();

    let (auth, auth_ct) = read_message(&mut stream, &guard, AUTH_LEN, "auth", &addr, |head| {
        probe_authentication(head, &static_key)
    })
    .await?;

    let remote = Node::new(auth.static_pubkey, peer_address);
    let peer = remote.id().short();
    let fail = |stage: &'static str| {
        let peer = peer.clone();
        move |e: RlpxTrustError| RlpxStreamError::handshake(stage, peer, e)
    };

    let mut responder = Responder::new(remote, static_key, auth.format.is_eip8());
    responder.record_auth(&auth).map_err(fail("auth"))?;

    let ack_plain = responder.create_auth_ack_message().map_err(fail("ack"))?;
    let ack = responder
        .encrypt_auth_ack_message(&ack_plain)
        .map_err(fail("ack"))?;
    guard.write_all(&mut stream, &ack).await?;
    tracing::debug!(%peer, format = auth.format.label(), "ack written");

    let secrets = responder
        .derive_secrets(&auth_ct, &ack)
        .map_err(fail("derive"))?;
    let remote = responder.complete().map_err(fail("derive"))?;
    tracing::debug!(%peer, "handshake complete as responder");

    let transport = Transport::new(stream, secrets, remote.clone(), &config.transport);
    Ok(Connection { remote, transport })
}

/// Read a handshake message whose length is only known after a first decode
/// attempt. Returns the decoded message and the exact bytes read.
async fn read_message<S, T>(
    stream: &mut S,
    guard: &Guard<'_>,
    initial_len: usize,
    stage: &'static str,
    peer: &str,
    probe: impl Fn(&[u8]) -> rlpxtrust::Result<Probe<T>>,
) -> Result<(T, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; initial_len];
    guard.read_exact(stream, &mut buf).await?;
    loop {
        match probe(&buf).map_err(|e| RlpxStreamError::handshake(stage, peer, e))? {
            Probe::Decoded(message) => return Ok((message, buf)),
            Probe::NeedMore(missing) => {
                tracing::trace!(stage, missing, "reading rest of EIP-8 message");
                let start = buf.len();
                buf.resize(start + missing, 0);
                guard.read_exact(stream, &mut buf[start..]).await?;
            }
        }
    }
}

/// Cancellation and deadline applied to every suspension point.
struct Guard<'a> {
    cancel: &'a CancellationToken,
    deadline: Instant,
    timeout: Duration,
}

impl<'a> Guard<'a> {
    fn new(cancel: &'a CancellationToken, timeout: Duration) -> Self {
        Self {
            cancel,
            deadline: Instant::now() + timeout,
            timeout,
        }
    }

    async fn read_exact<S: AsyncRead + Unpin>(&self, stream: &mut S, buf: &mut [u8]) -> Result<()> {
        self.run(stream.read_exact(buf)).await?;
        Ok(())
    }

    async fn write_all<S: AsyncWrite + Unpin>(&self, stream: &mut S, buf: &[u8]) -> Result<()> {
        self.run(async {
            stream.write_all(buf).await?;
            stream.flush().await
        })
        .await
    }

    async fn run<T>(&self, io: impl Future<Output = std::io::Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                tracing::debug!("handshake cancelled");
                Err(RlpxStreamError::Cancelled)
            }
            res = tokio::time::timeout_at(self.deadline, io) => match res {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    Err(RlpxStreamError::ConnectionClosed)
                }
                Ok(Err(e)) => Err(RlpxStreamError::Io(e)),
                Err(_) => {
                    tracing::debug!(timeout = ?self.timeout, "handshake timed out");
                    Err(RlpxStreamError::HandshakeTimeout(self.timeout))
                }
            },
        }
    }
}
