//! Noise_XX handshake internals.
//!
//! Implements the XX pattern over X25519, ChaCha20-Poly1305 and SHA-256:
//! cipher state, symmetric (transcript) state and the three-message
//! handshake state machine. Sessions wrap this machine and own the
//! post-handshake transport ciphers it produces.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Pattern identifier mixed into every transcript.
pub const NOISE_PROTOCOL_NAME: &str = "Noise_XX_25519_ChaChaPoly_SHA256";

/// X25519 public key length.
pub const DH_LEN: usize = 32;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;

/// Session-layer failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NoiseError {
    #[error("invalid handshake message")]
    InvalidHandshakeMessage,

    #[error("invalid peer id: {0:?}")]
    InvalidPeerId(String),

    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    #[error("session expired")]
    SessionExpired,

    #[error("session message limit exceeded")]
    MessageLimitExceeded,

    #[error("invalid ciphertext")]
    InvalidCiphertext,

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("invalid session state: {0}")]
    InvalidState(&'static str),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Which side of the handshake this node plays for a given peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseRole {
    Initiator,
    Responder,
}

#[derive(Zeroize, ZeroizeOnDrop)]
struct CipherKey([u8; 32]);

/// One direction of post-handshake traffic: an AEAD key plus the counter
/// nonce that must increase with every message.
pub(crate) struct CipherState {
    key: CipherKey,
    nonce: u64,
}

impl CipherState {
    fn new(key: [u8; 32]) -> Self {
        Self {
            key: CipherKey(key),
            nonce: 0,
        }
    }

    /// Current nonce, for diagnostics.
    pub(crate) fn nonce(&self) -> u64 {
        self.nonce
    }

    fn nonce_bytes(&self) -> Nonce {
        let mut bytes = [0u8; 12];
        bytes[4..].copy_from_slice(&self.nonce.to_le_bytes());
        Nonce::from(bytes)
    }

    pub(crate) fn encrypt_with_ad(
        &mut self,
        associated_data: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key.0));
        let nonce = self.nonce_bytes();

        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: associated_data,
                },
            )
            .map_err(|_| NoiseError::InvalidCiphertext)?;

        self.nonce += 1;
        Ok(ciphertext)
    }

    pub(crate) fn decrypt_with_ad(
        &mut self,
        associated_data: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, NoiseError> {
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&self.key.0));
        let nonce = self.nonce_bytes();

        let plaintext = cipher
            .decrypt(
                &nonce,
                Payload {
                    msg: ciphertext,
                    aad: associated_data,
                },
            )
            .map_err(|_| NoiseError::InvalidCiphertext)?;

        self.nonce += 1;
        Ok(plaintext)
    }
}

/// Transcript state shared by both handshake parties: chaining key, running
/// hash and the in-handshake cipher.
struct SymmetricState {
    chaining_key: [u8; 32],
    hash: [u8; 32],
    cipher: Option<CipherState>,
}

impl Drop for SymmetricState {
    fn drop(&mut self) {
        self.chaining_key.zeroize();
    }
}

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn hkdf_two(chaining_key: &[u8; 32], input: &[u8]) -> ([u8; 32], [u8; 32]) {
    let hkdf = Hkdf::<Sha256>::new(Some(chaining_key.as_slice()), input);
    let mut okm = [0u8; 64];
    hkdf.expand(&[], &mut okm)
        .expect("64 bytes is a valid HKDF-SHA256 output length");

    let mut first = [0u8; 32];
    let mut second = [0u8; 32];
    first.copy_from_slice(&okm[..32]);
    second.copy_from_slice(&okm[32..]);
    okm.zeroize();

    (first, second)
}

impl SymmetricState {
    fn new(protocol_name: &str) -> Self {
        let name = protocol_name.as_bytes();
        let hash = if name.len() <= 32 {
            let mut padded = [0u8; 32];
            padded[..name.len()].copy_from_slice(name);
            padded
        } else {
            sha256(&[name])
        };

        Self {
            chaining_key: hash,
            hash,
            cipher: None,
        }
    }

    fn mix_hash(&mut self, data: &[u8]) {
        self.hash = sha256(&[&self.hash, data]);
    }

    fn mix_key(&mut self, input_key_material: &[u8]) {
        let (chaining_key, cipher_key) = hkdf_two(&self.chaining_key, input_key_material);
        self.chaining_key = chaining_key;
        self.cipher = Some(CipherState::new(cipher_key));
    }

    fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let output = match self.cipher.as_mut() {
            Some(cipher) => {
                // In-handshake AEAD always binds the transcript hash.
                let hash = self.hash;
                cipher.encrypt_with_ad(&hash, plaintext)?
            }
            None => plaintext.to_vec(),
        };

        self.mix_hash(&output);
        Ok(output)
    }

    fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        let output = match self.cipher.as_mut() {
            Some(cipher) => {
                let hash = self.hash;
                cipher.decrypt_with_ad(&hash, ciphertext)?
            }
            None => ciphertext.to_vec(),
        };

        self.mix_hash(ciphertext);
        Ok(output)
    }

    fn split(&self) -> (CipherState, CipherState) {
        let (key_one, key_two) = hkdf_two(&self.chaining_key, &[]);
        (CipherState::new(key_one), CipherState::new(key_two))
    }
}

/// Result of a completed handshake.
pub(crate) struct HandshakeOutcome {
    pub send_cipher: CipherState,
    pub recv_cipher: CipherState,
    pub handshake_hash: [u8; 32],
    pub remote_static: [u8; 32],
}

/// XX handshake driver. Messages are numbered 0..3; even messages are
/// written by the initiator, odd by the responder.
pub(crate) struct HandshakeState {
    symmetric: SymmetricState,
    role: NoiseRole,
    local_static: StaticSecret,
    local_ephemeral: Option<StaticSecret>,
    remote_static: Option<PublicKey>,
    remote_ephemeral: Option<PublicKey>,
    next_message: usize,
}

impl HandshakeState {
    pub fn new(role: NoiseRole, local_static: StaticSecret) -> Self {
        let mut symmetric = SymmetricState::new(NOISE_PROTOCOL_NAME);
        // Empty prologue; both sides must agree.
        symmetric.mix_hash(&[]);

        Self {
            symmetric,
            role,
            local_static,
            local_ephemeral: None,
            remote_static: None,
            remote_ephemeral: None,
            next_message: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.next_message >= 3
    }

    /// Whether this side writes the next handshake message.
    pub fn our_turn(&self) -> bool {
        let initiator_writes = self.next_message % 2 == 0;
        match self.role {
            NoiseRole::Initiator => initiator_writes,
            NoiseRole::Responder => !initiator_writes,
        }
    }

    fn dh(
        secret: &StaticSecret,
        public: &Option<PublicKey>,
    ) -> Result<[u8; 32], NoiseError> {
        let public = public.as_ref().ok_or(NoiseError::InvalidHandshakeMessage)?;
        Ok(secret.diffie_hellman(public).to_bytes())
    }

    /// Produce the next handshake message.
    pub fn write_message(&mut self) -> Result<Vec<u8>, NoiseError> {
        if self.is_complete() || !self.our_turn() {
            return Err(NoiseError::InvalidState("not our turn to write"));
        }

        let mut message = Vec::new();

        match self.next_message {
            0 => {
                // -> e
                let ephemeral = StaticSecret::random_from_rng(OsRng);
                let public = PublicKey::from(&ephemeral);
                self.symmetric.mix_hash(public.as_bytes());
                message.extend_from_slice(public.as_bytes());
                self.local_ephemeral = Some(ephemeral);

                let payload = self.symmetric.encrypt_and_hash(&[])?;
                message.extend_from_slice(&payload);
            }
            1 => {
                // <- e, ee, s, es
                let ephemeral = StaticSecret::random_from_rng(OsRng);
                let public = PublicKey::from(&ephemeral);
                self.symmetric.mix_hash(public.as_bytes());
                message.extend_from_slice(public.as_bytes());

                let ee = Self::dh(&ephemeral, &self.remote_ephemeral)?;
                self.symmetric.mix_key(&ee);
                self.local_ephemeral = Some(ephemeral);

                let static_public = PublicKey::from(&self.local_static);
                let encrypted_static = self.symmetric.encrypt_and_hash(static_public.as_bytes())?;
                message.extend_from_slice(&encrypted_static);

                let es = Self::dh(&self.local_static, &self.remote_ephemeral)?;
                self.symmetric.mix_key(&es);

                let payload = self.symmetric.encrypt_and_hash(&[])?;
                message.extend_from_slice(&payload);
            }
            2 => {
                // -> s, se
                let static_public = PublicKey::from(&self.local_static);
                let encrypted_static = self.symmetric.encrypt_and_hash(static_public.as_bytes())?;
                message.extend_from_slice(&encrypted_static);

                let se = Self::dh(&self.local_static, &self.remote_ephemeral)?;
                self.symmetric.mix_key(&se);

                let payload = self.symmetric.encrypt_and_hash(&[])?;
                message.extend_from_slice(&payload);
            }
            _ => return Err(NoiseError::InvalidState("handshake already complete")),
        }

        self.next_message += 1;
        Ok(message)
    }

    /// Consume a handshake message from the peer.
    pub fn read_message(&mut self, message: &[u8]) -> Result<(), NoiseError> {
        if self.is_complete() || self.our_turn() {
            return Err(NoiseError::InvalidState("not our turn to read"));
        }

        fn take<'a>(
            message: &'a [u8],
            offset: &mut usize,
            len: usize,
        ) -> Result<&'a [u8], NoiseError> {
            let slice = message
                .get(*offset..*offset + len)
                .ok_or(NoiseError::InvalidHandshakeMessage)?;
            *offset += len;
            Ok(slice)
        }

        let mut offset = 0;

        match self.next_message {
            0 => {
                // -> e
                let mut public = [0u8; DH_LEN];
                public.copy_from_slice(take(message, &mut offset, DH_LEN)?);
                let remote = PublicKey::from(public);
                self.symmetric.mix_hash(remote.as_bytes());
                self.remote_ephemeral = Some(remote);

                let rest = &message[offset..];
                self.symmetric.decrypt_and_hash(rest)?;
            }
            1 => {
                // <- e, ee, s, es
                let mut public = [0u8; DH_LEN];
                public.copy_from_slice(take(message, &mut offset, DH_LEN)?);
                let remote = PublicKey::from(public);
                self.symmetric.mix_hash(remote.as_bytes());
                self.remote_ephemeral = Some(remote);

                let local_ephemeral = self
                    .local_ephemeral
                    .as_ref()
                    .ok_or(NoiseError::InvalidState("missing local ephemeral"))?;
                let ee = Self::dh(local_ephemeral, &self.remote_ephemeral)?;
                self.symmetric.mix_key(&ee);

                let encrypted_static = take(message, &mut offset, DH_LEN + TAG_LEN)?.to_vec();
                let static_bytes = self.symmetric.decrypt_and_hash(&encrypted_static)?;
                let mut static_key = [0u8; DH_LEN];
                static_key.copy_from_slice(&static_bytes);
                self.remote_static = Some(PublicKey::from(static_key));

                let local_ephemeral = self
                    .local_ephemeral
                    .as_ref()
                    .ok_or(NoiseError::InvalidState("missing local ephemeral"))?;
                let es = Self::dh(local_ephemeral, &self.remote_static)?;
                self.symmetric.mix_key(&es);

                let rest = &message[offset..];
                self.symmetric.decrypt_and_hash(rest)?;
            }
            2 => {
                // -> s, se
                let encrypted_static = take(message, &mut offset, DH_LEN + TAG_LEN)?.to_vec();
                let static_bytes = self.symmetric.decrypt_and_hash(&encrypted_static)?;
                let mut static_key = [0u8; DH_LEN];
                static_key.copy_from_slice(&static_bytes);
                self.remote_static = Some(PublicKey::from(static_key));

                let local_ephemeral = self
                    .local_ephemeral
                    .as_ref()
                    .ok_or(NoiseError::InvalidState("missing local ephemeral"))?;
                let se = Self::dh(local_ephemeral, &self.remote_static)?;
                self.symmetric.mix_key(&se);

                let rest = &message[offset..];
                self.symmetric.decrypt_and_hash(rest)?;
            }
            _ => return Err(NoiseError::InvalidState("handshake already complete")),
        }

        self.next_message += 1;
        Ok(())
    }

    /// Split the transcript into transport ciphers once all three messages
    /// have been exchanged.
    pub fn finalize(self) -> Result<HandshakeOutcome, NoiseError> {
        if !self.is_complete() {
            return Err(NoiseError::InvalidState("handshake not complete"));
        }

        let remote_static = self
            .remote_static
            .ok_or(NoiseError::InvalidHandshakeMessage)?;

        let (initiator_cipher, responder_cipher) = self.symmetric.split();
        let (send_cipher, recv_cipher) = match self.role {
            NoiseRole::Initiator => (initiator_cipher, responder_cipher),
            NoiseRole::Responder => (responder_cipher, initiator_cipher),
        };

        Ok(HandshakeOutcome {
            send_cipher,
            recv_cipher,
            handshake_hash: self.symmetric.hash,
            remote_static: remote_static.to_bytes(),
        })
    }
}
