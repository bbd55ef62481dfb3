//! Per-peer Noise session.
//!
//! A session is created on the first outbound intent or the first inbound
//! handshake message, whichever comes first. It drives the handshake state
//! machine to completion, then owns the two transport ciphers and the
//! counters that decide when the pair must rekey.

use std::time::SystemTime;

use x25519_dalek::StaticSecret;

use super::noise::{CipherState, HandshakeState, NoiseError, NoiseRole};
use crate::constants::{
    NOISE_HANDSHAKE_TIMEOUT, NOISE_MAX_MESSAGES_PER_SESSION, NOISE_REKEY_THRESHOLD,
    NOISE_SESSION_TIMEOUT,
};

pub struct NoiseSession {
    peer_id: String,
    role: NoiseRole,
    handshake: Option<HandshakeState>,
    send_cipher: Option<CipherState>,
    recv_cipher: Option<CipherState>,
    remote_static: Option<[u8; 32]>,
    handshake_hash: Option<[u8; 32]>,
    established: bool,
    message_count: u64,
    created_at: SystemTime,
    last_activity: SystemTime,
}

impl NoiseSession {
    pub fn new(peer_id: &str, role: NoiseRole, local_static: StaticSecret) -> Self {
        let now = SystemTime::now();

        Self {
            peer_id: peer_id.to_string(),
            role,
            handshake: Some(HandshakeState::new(role, local_static)),
            send_cipher: None,
            recv_cipher: None,
            remote_static: None,
            handshake_hash: None,
            established: false,
            message_count: 0,
            created_at: now,
            last_activity: now,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> NoiseRole {
        self.role
    }

    pub fn is_established(&self) -> bool {
        self.established
    }

    pub fn handshake_in_progress(&self) -> bool {
        !self.established && self.handshake.is_some()
    }

    pub fn message_count(&self) -> u64 {
        self.message_count
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn last_activity(&self) -> SystemTime {
        self.last_activity
    }

    pub fn remote_static_key(&self) -> Option<[u8; 32]> {
        self.remote_static
    }

    pub fn handshake_hash(&self) -> Option<[u8; 32]> {
        self.handshake_hash
    }

    /// First handshake message, Initiator only.
    pub fn start_handshake(&mut self) -> Result<Vec<u8>, NoiseError> {
        if self.established {
            return Err(NoiseError::InvalidState("session already established"));
        }

        let handshake = self
            .handshake
            .as_mut()
            .ok_or(NoiseError::InvalidState("handshake consumed"))?;

        if self.role != NoiseRole::Initiator {
            return Err(NoiseError::InvalidState("responder cannot open"));
        }

        let message = handshake.write_message()?;
        self.last_activity = SystemTime::now();
        Ok(message)
    }

    /// Feed one inbound handshake message; returns the reply to send, or
    /// `None` when the handshake just completed on this side with nothing
    /// left to say.
    pub fn process_handshake_message(
        &mut self,
        message: &[u8],
    ) -> Result<Option<Vec<u8>>, NoiseError> {
        if self.established {
            return Err(NoiseError::InvalidState("session already established"));
        }

        let handshake = self
            .handshake
            .as_mut()
            .ok_or(NoiseError::InvalidState("handshake consumed"))?;

        handshake.read_message(message)?;

        let reply = if handshake.is_complete() {
            None
        } else {
            Some(handshake.write_message()?)
        };

        if self.handshake.as_ref().is_some_and(|h| h.is_complete()) {
            self.finish_handshake()?;
        }

        self.last_activity = SystemTime::now();
        Ok(reply)
    }

    fn finish_handshake(&mut self) -> Result<(), NoiseError> {
        let handshake = self
            .handshake
            .take()
            .ok_or(NoiseError::InvalidState("handshake consumed"))?;

        let outcome = handshake.finalize()?;
        self.send_cipher = Some(outcome.send_cipher);
        self.recv_cipher = Some(outcome.recv_cipher);
        self.handshake_hash = Some(outcome.handshake_hash);
        self.remote_static = Some(outcome.remote_static);
        self.established = true;

        Ok(())
    }

    fn check_limits(&self) -> Result<(), NoiseError> {
        if self.message_count >= NOISE_MAX_MESSAGES_PER_SESSION {
            return Err(NoiseError::MessageLimitExceeded);
        }

        let expired = self
            .created_at
            .elapsed()
            .map(|age| age > NOISE_SESSION_TIMEOUT)
            .unwrap_or(true);
        if expired {
            return Err(NoiseError::SessionExpired);
        }

        Ok(())
    }

    /// Encrypt application data for the peer. Counts against the session
    /// message budget.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if !self.established {
            return Err(NoiseError::InvalidState("session not established"));
        }
        self.check_limits()?;

        let cipher = self
            .send_cipher
            .as_mut()
            .ok_or(NoiseError::InvalidState("missing send cipher"))?;

        let ciphertext = cipher.encrypt_with_ad(&[], plaintext)?;
        self.message_count += 1;
        self.last_activity = SystemTime::now();
        Ok(ciphertext)
    }

    /// Decrypt application data from the peer. A session that has not
    /// finished its handshake cannot authenticate anything, so the failure
    /// reads the same as a bad tag.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, NoiseError> {
        if !self.established {
            return Err(NoiseError::InvalidCiphertext);
        }
        self.check_limits()?;

        let cipher = self
            .recv_cipher
            .as_mut()
            .ok_or(NoiseError::InvalidState("missing receive cipher"))?;

        let plaintext = cipher.decrypt_with_ad(&[], ciphertext)?;
        self.message_count += 1;
        self.last_activity = SystemTime::now();
        Ok(plaintext)
    }

    /// Whether the pair should run a fresh handshake: old sessions and
    /// sessions close to the message cap both qualify.
    pub fn needs_renegotiation(&self) -> bool {
        let aged = self
            .created_at
            .elapsed()
            .map(|age| age > NOISE_SESSION_TIMEOUT)
            .unwrap_or(true);

        let threshold =
            (NOISE_MAX_MESSAGES_PER_SESSION as f64 * NOISE_REKEY_THRESHOLD) as u64;

        aged || self.message_count >= threshold
    }

    /// An in-progress handshake that has outlived its window.
    pub fn handshake_timed_out(&self) -> bool {
        self.handshake_in_progress()
            && self
                .created_at
                .elapsed()
                .map(|age| age > NOISE_HANDSHAKE_TIMEOUT)
                .unwrap_or(true)
    }

    #[cfg(test)]
    pub(crate) fn force_message_count(&mut self, count: u64) {
        self.message_count = count;
    }

    #[cfg(test)]
    pub(crate) fn force_created_at(&mut self, created_at: SystemTime) {
        self.created_at = created_at;
    }
}
