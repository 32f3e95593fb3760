// RLPx handshake protocol: two-message exchange with ECIES-encrypted bodies.
//
//   Initiator                         Responder
//     |--- auth (sig, pubkey, nonce) -->|
//     |<-- ack (eph pubkey, nonce) -----|
//     |== secrets over both messages ===|

use rand::RngCore;
use secp256k1::{PublicKey, SecretKey};

use crate::crypto::keys::{EphemeralKey, IdentityKeyPair};
use crate::error::{Result, RlpxTrustError};
use crate::handshake::messages::{
    auth_signature_hash, decode_auth_ack, decode_authentication, seal, AckBody, AuthBody,
    DecodedAck, DecodedAuth, WireFormat, NONCE_LEN, PROTOCOL_VERSION,
};
use crate::handshake::secrets::{derive_secrets, Role, Secrets, Transcript};
use crate::handshake::state::HandshakeState;
use crate::node::Node;

/// State shared by both roles.
#[derive(Debug)]
struct Core {
    remote: Node,
    identity: IdentityKeyPair,
    /// Taken (and wiped on drop) by secret derivation.
    ephemeral: Option<EphemeralKey>,
    nonce: [u8; NONCE_LEN],
    format: WireFormat,
    state: HandshakeState,
}

impl Core {
    fn new(remote: Node, static_key: SecretKey, use_eip8: bool) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self {
            remote,
            identity: IdentityKeyPair::from_secret_key(static_key),
            ephemeral: Some(EphemeralKey::generate()),
            nonce,
            format: WireFormat::from_eip8_flag(use_eip8),
            state: HandshakeState::Created,
        }
    }

    fn set_ephemeral(&mut self, secret: SecretKey) -> Result<()> {
        self.state.expect_created("Created")?;
        self.ephemeral = Some(EphemeralKey::from_secret_key(secret));
        Ok(())
    }

    fn set_nonce(&mut self, nonce: [u8; NONCE_LEN]) -> Result<()> {
        self.state.expect_created("Created")?;
        self.nonce = nonce;
        Ok(())
    }

    fn ephemeral(&self) -> Result<&EphemeralKey> {
        self.ephemeral
            .as_ref()
            .ok_or_else(|| RlpxTrustError::InvalidKey("ephemeral key already consumed".into()))
    }

    fn derive(&mut self, role: Role, auth_ciphertext: &[u8], ack_ciphertext: &[u8]) -> Result<Secrets> {
        let (remote_ephemeral, remote_nonce) = match self.state.remote_ephemeral() {
            Some((key, nonce)) => (*key, *nonce),
            None => return Err(self.state.invalid_transition("SecretsDerived")),
        };
        let ephemeral = self
            .ephemeral
            .take()
            .ok_or_else(|| RlpxTrustError::InvalidKey("ephemeral key already consumed".into()))?;

        let (initiator_nonce, responder_nonce) = match role {
            Role::Initiator => (&self.nonce, &remote_nonce),
            Role::Responder => (&remote_nonce, &self.nonce),
        };
        let transcript = Transcript {
            initiator_nonce,
            responder_nonce,
            auth_ciphertext,
            ack_ciphertext,
        };
        let secrets = derive_secrets(role, &ephemeral, &remote_ephemeral, &transcript)?;

        self.state = HandshakeState::SecretsDerived;
        tracing::debug!(
            role = role.label(),
            peer = %self.remote.id().short(),
            "handshake secrets derived"
        );
        Ok(secrets)
    }

    fn complete(&mut self) -> Result<Node> {
        match self.state {
            HandshakeState::SecretsDerived => {
                self.state = HandshakeState::Complete;
                Ok(self.remote.clone())
            }
            ref other => Err(other.invalid_transition("Complete")),
        }
    }
}

// ── Initiator ────────────────────────────────────────────────────────────

/// Dialing side of the RLPx handshake.
#[derive(Debug)]
pub struct Initiator {
    core: Core,
}

impl Initiator {
    /// Start a handshake towards `remote` with a fresh ephemeral key and nonce.
    pub fn new(remote: Node, static_key: SecretKey, use_eip8: bool) -> Self {
        Self {
            core: Core::new(remote, static_key, use_eip8),
        }
    }

    /// Replace the generated ephemeral key. Only valid before any message.
    pub fn with_ephemeral_key(mut self, secret: SecretKey) -> Result<Self> {
        self.core.set_ephemeral(secret)?;
        Ok(self)
    }

    /// Replace the generated nonce. Only valid before any message.
    pub fn with_nonce(mut self, nonce: [u8; NONCE_LEN]) -> Result<Self> {
        self.core.set_nonce(nonce)?;
        Ok(self)
    }

    pub fn state(&self) -> &HandshakeState {
        &self.core.state
    }

    pub fn remote(&self) -> &Node {
        &self.core.remote
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.core.nonce
    }

    pub fn format(&self) -> WireFormat {
        self.core.format
    }

    /// Our ephemeral public key, until secret derivation consumes the pair.
    pub fn ephemeral_public_key(&self) -> Option<&PublicKey> {
        self.core.ephemeral.as_ref().map(EphemeralKey::public_key)
    }

    /// Build the auth plaintext in the configured wire format.
    pub fn create_auth_message(&self) -> Result<Vec<u8>> {
        self.core.state.expect_created("AuthSent")?;
        let ephemeral = self.core.ephemeral()?;

        let msg_hash = auth_signature_hash(
            self.core.identity.secret_key(),
            &self.core.remote.pubkey,
            &self.core.nonce,
        );
        let body = AuthBody {
            signature: ephemeral.sign_recoverable(&msg_hash)?,
            static_pubkey: *self.core.identity.public_key(),
            nonce: self.core.nonce,
            version: PROTOCOL_VERSION,
        };
        Ok(match self.core.format {
            WireFormat::Legacy => body.encode_legacy(ephemeral.public_key()),
            WireFormat::Eip8 => body.encode_eip8(),
        })
    }

    /// Encrypt the auth plaintext to the remote's static key.
    pub fn encrypt_auth_message(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.core.state.expect_created("AuthSent")?;
        let ciphertext = seal(plaintext, self.core.format, &self.core.remote.pubkey)?;
        self.core.state = HandshakeState::AuthSent;
        tracing::debug!(
            peer = %self.core.remote.id().short(),
            format = self.core.format.label(),
            len = ciphertext.len(),
            "auth sealed"
        );
        Ok(ciphertext)
    }

    /// Decrypt and decode the responder's ack, recording its ephemeral key and nonce.
    pub fn decode_auth_ack_message(&mut self, ciphertext: &[u8]) -> Result<DecodedAck> {
        self.expect_auth_sent()?;
        let ack = decode_auth_ack(ciphertext, self.core.identity.secret_key())?;
        self.record_auth_ack(&ack)?;
        Ok(ack)
    }

    /// Record an ack decoded elsewhere (for example by a streaming reader).
    pub fn record_auth_ack(&mut self, ack: &DecodedAck) -> Result<()> {
        self.expect_auth_sent()?;
        self.core.state = HandshakeState::AckReceived {
            remote_ephemeral: ack.ephemeral_pubkey,
            remote_nonce: ack.nonce,
        };
        tracing::debug!(format = ack.format.label(), version = ack.version, "ack received");
        Ok(())
    }

    /// Derive session secrets over the exact auth and ack bytes sent on the wire.
    ///
    /// Consumes the ephemeral key; a second call fails.
    pub fn derive_secrets(&mut self, auth_ciphertext: &[u8], ack_ciphertext: &[u8]) -> Result<Secrets> {
        match self.core.state {
            HandshakeState::AckReceived { .. } => {
                self.core.derive(Role::Initiator, auth_ciphertext, ack_ciphertext)
            }
            ref other => Err(other.invalid_transition("SecretsDerived")),
        }
    }

    /// Finish the handshake, returning the remote node.
    pub fn complete(&mut self) -> Result<Node> {
        self.core.complete()
    }

    fn expect_auth_sent(&self) -> Result<()> {
        match self.core.state {
            HandshakeState::AuthSent => Ok(()),
            ref other => Err(other.invalid_transition("AckReceived")),
        }
    }
}

// ── Responder ────────────────────────────────────────────────────────────

/// Listening side of the RLPx handshake.
#[derive(Debug)]
pub struct Responder {
    core: Core,
}

impl Responder {
    /// Prepare to answer an auth from `remote`.
    pub fn new(remote: Node, static_key: SecretKey, use_eip8: bool) -> Self {
        Self {
            core: Core::new(remote, static_key, use_eip8),
        }
    }

    pub fn with_ephemeral_key(mut self, secret: SecretKey) -> Result<Self> {
        self.core.set_ephemeral(secret)?;
        Ok(self)
    }

    pub fn with_nonce(mut self, nonce: [u8; NONCE_LEN]) -> Result<Self> {
        self.core.set_nonce(nonce)?;
        Ok(self)
    }

    pub fn state(&self) -> &HandshakeState {
        &self.core.state
    }

    pub fn remote(&self) -> &Node {
        &self.core.remote
    }

    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.core.nonce
    }

    pub fn format(&self) -> WireFormat {
        self.core.format
    }

    pub fn ephemeral_public_key(&self) -> Option<&PublicKey> {
        self.core.ephemeral.as_ref().map(EphemeralKey::public_key)
    }

    /// Decrypt and decode an auth ciphertext addressed to us.
    pub fn receive_auth(&mut self, ciphertext: &[u8]) -> Result<DecodedAuth> {
        self.core.state.expect_created("AuthReceived")?;
        let auth = decode_authentication(ciphertext, self.core.identity.secret_key())?;
        self.record_auth(&auth)?;
        Ok(auth)
    }

    /// Record an auth decoded elsewhere.
    ///
    /// The auth's static key must be the one this handshake is bound to.
    pub fn record_auth(&mut self, auth: &DecodedAuth) -> Result<()> {
        self.core.state.expect_created("AuthReceived")?;
        if auth.static_pubkey != self.core.remote.pubkey {
            return Err(RlpxTrustError::RemoteKeyMismatch);
        }
        self.core.state = HandshakeState::AuthReceived {
            remote_ephemeral: auth.ephemeral_pubkey,
            remote_nonce: auth.nonce,
            format: auth.format,
        };
        tracing::debug!(
            peer = %self.core.remote.id().short(),
            format = auth.format.label(),
            version = auth.version,
            "auth received"
        );
        Ok(())
    }

    /// Build the ack plaintext in the configured wire format.
    pub fn create_auth_ack_message(&self) -> Result<Vec<u8>> {
        if !matches!(self.core.state, HandshakeState::AuthReceived { .. }) {
            return Err(self.core.state.invalid_transition("AckSent"));
        }
        let body = AckBody {
            ephemeral_pubkey: *self.core.ephemeral()?.public_key(),
            nonce: self.core.nonce,
            version: PROTOCOL_VERSION,
        };
        Ok(match self.core.format {
            WireFormat::Legacy => body.encode_legacy(),
            WireFormat::Eip8 => body.encode_eip8(),
        })
    }

    /// Encrypt the ack plaintext to the initiator's static key.
    pub fn encrypt_auth_ack_message(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let (remote_ephemeral, remote_nonce) = match self.core.state {
            HandshakeState::AuthReceived {
                remote_ephemeral,
                remote_nonce,
                ..
            } => (remote_ephemeral, remote_nonce),
            ref other => return Err(other.invalid_transition("AckSent")),
        };
        let ciphertext = seal(plaintext, self.core.format, &self.core.remote.pubkey)?;
        self.core.state = HandshakeState::AckSent {
            remote_ephemeral,
            remote_nonce,
        };
        Ok(ciphertext)
    }

    /// Derive session secrets over the exact auth and ack bytes.
    ///
    /// Consumes the ephemeral key; a second call fails.
    pub fn derive_secrets(&mut self, auth_ciphertext: &[u8], ack_ciphertext: &[u8]) -> Result<Secrets> {
        match self.core.state {
            HandshakeState::AuthReceived { .. } | HandshakeState::AckSent { .. } => {
                self.core.derive(Role::Responder, auth_ciphertext, ack_ciphertext)
            }
            ref other => Err(other.invalid_transition("SecretsDerived")),
        }
    }

    pub fn complete(&mut self) -> Result<Node> {
        self.core.complete()
    }
}
