//! Session management across peers.
//!
//! The engine owns the local static X25519 key, one session per peer and the
//! deterministic role rule that stops both sides from initiating at once:
//! the lexicographically smaller hex peer id plays Initiator.

use dashmap::DashMap;
use log::{debug, info, warn};
use rand::rngs::OsRng;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use super::migration::MigrationStrategy;
use super::noise::{NoiseError, NoiseRole};
use super::session::NoiseSession;

fn validate_session_peer_id(peer_id: &str) -> Result<(), NoiseError> {
    crate::protocol::validate_peer_id(peer_id)
        .map_err(|_| NoiseError::InvalidPeerId(peer_id.to_string()))
}

pub struct NoiseEngine {
    local_static: StaticSecret,
    strategy: MigrationStrategy,
    sessions: DashMap<String, NoiseSession>,
    /// Fresh handshakes replacing established sessions; swapped in only once
    /// they complete, so the old keys stay usable until that moment.
    pending_rekey: DashMap<String, NoiseSession>,
}

impl NoiseEngine {
    pub fn new(strategy: MigrationStrategy) -> Self {
        Self {
            local_static: StaticSecret::random_from_rng(OsRng),
            strategy,
            sessions: DashMap::new(),
            pending_rekey: DashMap::new(),
        }
    }

    /// Initiator iff the local id sorts before the remote id.
    pub fn resolve_role(local_peer_id: &str, remote_peer_id: &str) -> NoiseRole {
        if local_peer_id < remote_peer_id {
            NoiseRole::Initiator
        } else {
            NoiseRole::Responder
        }
    }

    pub fn strategy(&self) -> MigrationStrategy {
        self.strategy
    }

    /// Pattern string announced to peers; the running pattern is classical
    /// XX for every strategy until a post-quantum KEM lands.
    pub fn announced_pattern(&self) -> &'static str {
        self.strategy.announced_pattern()
    }

    /// SHA-256 fingerprint of the local static public key.
    pub fn local_fingerprint(&self) -> String {
        let public = PublicKey::from(&self.local_static);
        hex::encode(Sha256::digest(public.as_bytes()))
    }

    /// Fingerprint of an established peer's static key.
    pub fn remote_fingerprint(&self, peer_id: &str) -> Option<String> {
        self.sessions
            .get(peer_id)
            .and_then(|session| session.remote_static_key())
            .map(|key| hex::encode(Sha256::digest(key)))
    }

    /// Open a handshake towards `peer_id`, creating the Initiator session.
    /// Fails when a handshake is already in flight or a session is already
    /// established.
    pub fn initiate_handshake(&self, peer_id: &str) -> Result<Vec<u8>, NoiseError> {
        validate_session_peer_id(peer_id)?;

        if let Some(session) = self.sessions.get(peer_id) {
            if session.is_established() {
                return Err(NoiseError::InvalidState("session already established"));
            }
            return Err(NoiseError::InvalidState("handshake already in flight"));
        }

        let mut session =
            NoiseSession::new(peer_id, NoiseRole::Initiator, self.local_static.clone());
        let message = session.start_handshake()?;
        self.sessions.insert(peer_id.to_string(), session);

        info!("Initiated Noise handshake with {}", peer_id);
        Ok(message)
    }

    /// Feed an inbound handshake opener. When a session with the peer is
    /// already established this is the peer starting a rekey: the message
    /// runs against a fresh Responder handshake held in `pending_rekey`
    /// while the old session keeps serving traffic. Crossed rekey attempts
    /// resolve like initial handshakes, by the smaller peer id.
    pub fn process_handshake_init(
        &self,
        peer_id: &str,
        message: &[u8],
        local_peer_id: &str,
    ) -> Result<Option<Vec<u8>>, NoiseError> {
        validate_session_peer_id(peer_id)?;

        if self.has_established_session(peer_id) {
            if self.pending_rekey.contains_key(peer_id) {
                if local_peer_id < peer_id {
                    // Our initiator handshake outranks theirs.
                    return Err(NoiseError::InvalidState("rekey already in flight"));
                }
                self.pending_rekey.remove(peer_id);
                debug!("Yielding our rekey attempt to {}", peer_id);
            }

            let mut fresh =
                NoiseSession::new(peer_id, NoiseRole::Responder, self.local_static.clone());
            let reply = fresh.process_handshake_message(message)?;
            self.pending_rekey.insert(peer_id.to_string(), fresh);

            info!("Peer {} opened a rekey; replacement handshake running", peer_id);
            return Ok(reply);
        }

        self.process_handshake_message(peer_id, message)
    }

    /// Feed an inbound handshake continuation, creating a Responder session
    /// when none exists yet. Returns the reply to send, if any. Opener
    /// messages go through [`Self::process_handshake_init`] so rekeys are
    /// told apart from duplicates.
    pub fn process_handshake_message(
        &self,
        peer_id: &str,
        message: &[u8],
    ) -> Result<Option<Vec<u8>>, NoiseError> {
        validate_session_peer_id(peer_id)?;

        // A pending rekey handshake takes precedence; it is the only one the
        // peer can be speaking to.
        if let Some(mut pending) = self.pending_rekey.get_mut(peer_id) {
            let reply = pending.process_handshake_message(message)?;
            let completed = pending.is_established();
            drop(pending);

            if completed {
                self.promote_pending(peer_id);
            }
            return Ok(reply);
        }

        if !self.sessions.contains_key(peer_id) {
            let session =
                NoiseSession::new(peer_id, NoiseRole::Responder, self.local_static.clone());
            self.sessions.insert(peer_id.to_string(), session);
            debug!("Created responder session for {}", peer_id);
        }

        let mut session = self
            .sessions
            .get_mut(peer_id)
            .ok_or(NoiseError::InvalidState("session vanished"))?;

        let reply = session.process_handshake_message(message)?;
        if session.is_established() {
            info!("Noise session established with {}", peer_id);
        }

        Ok(reply)
    }

    fn promote_pending(&self, peer_id: &str) {
        if let Some((_, fresh)) = self.pending_rekey.remove(peer_id) {
            self.sessions.insert(peer_id.to_string(), fresh);
            info!("Rekeyed Noise session with {}", peer_id);
        }
    }

    /// Encrypt application data for an established peer session.
    pub fn encrypt(&self, plaintext: &[u8], peer_id: &str) -> Result<Vec<u8>, NoiseError> {
        let mut session = self
            .sessions
            .get_mut(peer_id)
            .ok_or(NoiseError::InvalidState("no session for peer"))?;

        session.encrypt(plaintext)
    }

    /// Decrypt application data from a peer session.
    pub fn decrypt(&self, ciphertext: &[u8], peer_id: &str) -> Result<Vec<u8>, NoiseError> {
        let mut session = self
            .sessions
            .get_mut(peer_id)
            .ok_or(NoiseError::InvalidState("no session for peer"))?;

        session.decrypt(ciphertext)
    }

    pub fn has_session(&self, peer_id: &str) -> bool {
        self.sessions.contains_key(peer_id)
    }

    pub fn has_established_session(&self, peer_id: &str) -> bool {
        self.sessions
            .get(peer_id)
            .map(|session| session.is_established())
            .unwrap_or(false)
    }

    /// Whether a replacement handshake for this peer is in flight.
    pub fn has_pending_rekey(&self, peer_id: &str) -> bool {
        self.pending_rekey.contains_key(peer_id)
    }

    pub fn established_session_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_established())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn remove_session(&self, peer_id: &str) {
        if self.sessions.remove(peer_id).is_some() {
            info!("Removed Noise session for {}", peer_id);
        }
        self.pending_rekey.remove(peer_id);
    }

    pub fn session_message_count(&self, peer_id: &str) -> Option<u64> {
        self.sessions.get(peer_id).map(|s| s.message_count())
    }

    pub fn handshake_hash(&self, peer_id: &str) -> Option<[u8; 32]> {
        self.sessions.get(peer_id).and_then(|s| s.handshake_hash())
    }

    pub fn remote_static_key(&self, peer_id: &str) -> Option<[u8; 32]> {
        self.sessions.get(peer_id).and_then(|s| s.remote_static_key())
    }

    /// Peers whose sessions have aged or neared the message cap.
    pub fn sessions_needing_rekey(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_established() && entry.value().needs_renegotiation())
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Start a replacement handshake for an established session. The old
    /// session keeps serving until the new one completes.
    pub fn initiate_rekey(&self, peer_id: &str) -> Result<Vec<u8>, NoiseError> {
        if !self.has_established_session(peer_id) {
            return Err(NoiseError::InvalidState("no established session to rekey"));
        }
        if self.pending_rekey.contains_key(peer_id) {
            return Err(NoiseError::InvalidState("rekey already in flight"));
        }

        let mut fresh =
            NoiseSession::new(peer_id, NoiseRole::Initiator, self.local_static.clone());
        let message = fresh.start_handshake()?;
        self.pending_rekey.insert(peer_id.to_string(), fresh);

        info!("Initiated rekey handshake with {}", peer_id);
        Ok(message)
    }

    /// Drop handshakes that made no progress inside their window. Returns
    /// the affected peer ids so callers can re-trigger later.
    pub fn cleanup_stale_handshakes(&self) -> Vec<String> {
        let stale: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().handshake_timed_out())
            .map(|entry| entry.key().clone())
            .collect();

        for peer_id in &stale {
            self.sessions.remove(peer_id);
            warn!("Abandoned timed-out handshake with {}", peer_id);
        }

        let stale_pending: Vec<String> = self
            .pending_rekey
            .iter()
            .filter(|entry| entry.value().handshake_timed_out())
            .map(|entry| entry.key().clone())
            .collect();

        for peer_id in stale_pending {
            self.pending_rekey.remove(&peer_id);
            warn!("Abandoned timed-out rekey handshake with {}", peer_id);
        }

        stale
    }

    pub fn statistics(&self) -> Value {
        let established = self.established_session_ids().len();

        json!({
            "sessions": self.sessions.len(),
            "established_sessions": established,
            "pending_rekeys": self.pending_rekey.len(),
            "announced_pattern": self.announced_pattern(),
            "fingerprint": self.local_fingerprint(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_session_mut<R>(
        &self,
        peer_id: &str,
        f: impl FnOnce(&mut NoiseSession) -> R,
    ) -> Option<R> {
        self.sessions.get_mut(peer_id).map(|mut s| f(&mut s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    const ALICE: &str = "0000000000000001";
    const BOB: &str = "0000000000000002";

    /// Run a full handshake between two engines; `a` has the smaller id and
    /// therefore initiates.
    fn establish(a: &NoiseEngine, b: &NoiseEngine) {
        let msg1 = a.initiate_handshake(BOB).unwrap();
        let msg2 = b.process_handshake_message(ALICE, &msg1).unwrap().unwrap();
        let msg3 = a.process_handshake_message(BOB, &msg2).unwrap().unwrap();
        assert!(b.process_handshake_message(ALICE, &msg3).unwrap().is_none());

        assert!(a.has_established_session(BOB));
        assert!(b.has_established_session(ALICE));
    }

    #[test]
    fn role_resolution_is_deterministic() {
        assert_eq!(NoiseEngine::resolve_role(ALICE, BOB), NoiseRole::Initiator);
        assert_eq!(NoiseEngine::resolve_role(BOB, ALICE), NoiseRole::Responder);
    }

    #[test]
    fn engines_establish_and_exchange() {
        let a = NoiseEngine::new(MigrationStrategy::None);
        let b = NoiseEngine::new(MigrationStrategy::None);
        establish(&a, &b);

        let ciphertext = a.encrypt(b"mesh traffic", BOB).unwrap();
        assert_eq!(b.decrypt(&ciphertext, ALICE).unwrap(), b"mesh traffic");

        assert_eq!(a.session_message_count(BOB), Some(1));
        assert_eq!(a.handshake_hash(BOB), b.handshake_hash(ALICE));
        assert_eq!(
            a.remote_fingerprint(BOB).unwrap(),
            b.local_fingerprint()
        );
    }

    #[test]
    fn decrypt_without_session_is_invalid_state() {
        let engine = NoiseEngine::new(MigrationStrategy::None);
        assert!(matches!(
            engine.decrypt(b"x", BOB).unwrap_err(),
            NoiseError::InvalidState(_)
        ));
    }

    #[test]
    fn malformed_peer_id_is_rejected() {
        let engine = NoiseEngine::new(MigrationStrategy::None);
        assert!(matches!(
            engine.initiate_handshake("not-a-peer").unwrap_err(),
            NoiseError::InvalidPeerId(_)
        ));
    }

    #[test]
    fn duplicate_initiation_is_rejected() {
        let engine = NoiseEngine::new(MigrationStrategy::None);
        engine.initiate_handshake(BOB).unwrap();

        assert!(matches!(
            engine.initiate_handshake(BOB).unwrap_err(),
            NoiseError::InvalidState(_)
        ));
    }

    #[test]
    fn rekey_swaps_session_only_on_completion() {
        let a = NoiseEngine::new(MigrationStrategy::None);
        let b = NoiseEngine::new(MigrationStrategy::None);
        establish(&a, &b);

        // Old session still serves while the rekey handshake runs.
        let msg1 = a.initiate_rekey(BOB).unwrap();
        assert!(a.has_pending_rekey(BOB));
        let ciphertext = a.encrypt(b"still old keys", BOB).unwrap();
        assert_eq!(b.decrypt(&ciphertext, ALICE).unwrap(), b"still old keys");

        // B sees the opener against its established session and runs the
        // replacement handshake alongside the old one.
        let msg2 = b.process_handshake_init(ALICE, &msg1, BOB).unwrap().unwrap();
        assert!(b.has_pending_rekey(ALICE));
        let msg3 = a.process_handshake_message(BOB, &msg2).unwrap().unwrap();
        assert!(b.process_handshake_message(ALICE, &msg3).unwrap().is_none());

        // New sessions took over atomically on both sides; counters
        // restarted.
        assert!(a.has_established_session(BOB));
        assert!(b.has_established_session(ALICE));
        assert!(!a.has_pending_rekey(BOB));
        assert!(!b.has_pending_rekey(ALICE));
        assert_eq!(a.session_message_count(BOB), Some(0));
        assert_eq!(b.session_message_count(ALICE), Some(0));

        let ciphertext = a.encrypt(b"fresh keys", BOB).unwrap();
        assert_eq!(b.decrypt(&ciphertext, ALICE).unwrap(), b"fresh keys");
    }

    #[test]
    fn crossed_rekeys_resolve_by_peer_id() {
        let a = NoiseEngine::new(MigrationStrategy::None);
        let b = NoiseEngine::new(MigrationStrategy::None);
        establish(&a, &b);

        let a_init = a.initiate_rekey(BOB).unwrap();
        let b_init = b.initiate_rekey(ALICE).unwrap();

        // A has the smaller id: its attempt wins, B's opener is refused.
        assert!(matches!(
            a.process_handshake_init(BOB, &b_init, ALICE).unwrap_err(),
            NoiseError::InvalidState(_)
        ));

        // B yields its own attempt and responds to A's.
        let msg2 = b.process_handshake_init(ALICE, &a_init, BOB).unwrap().unwrap();
        let msg3 = a.process_handshake_message(BOB, &msg2).unwrap().unwrap();
        assert!(b.process_handshake_message(ALICE, &msg3).unwrap().is_none());

        assert!(a.has_established_session(BOB));
        assert!(b.has_established_session(ALICE));
        assert_eq!(a.session_message_count(BOB), Some(0));

        let ciphertext = b.encrypt(b"after the tiebreak", ALICE).unwrap();
        assert_eq!(a.decrypt(&ciphertext, BOB).unwrap(), b"after the tiebreak");
    }

    #[test]
    fn fresh_handshake_opener_still_routes_normally() {
        let a = NoiseEngine::new(MigrationStrategy::None);
        let b = NoiseEngine::new(MigrationStrategy::None);

        // No established session: the opener path behaves exactly like the
        // plain handshake entry point.
        let msg1 = a.initiate_handshake(BOB).unwrap();
        let msg2 = b.process_handshake_init(ALICE, &msg1, BOB).unwrap().unwrap();
        let msg3 = a.process_handshake_message(BOB, &msg2).unwrap().unwrap();
        assert!(b.process_handshake_message(ALICE, &msg3).unwrap().is_none());

        assert!(a.has_established_session(BOB));
        assert!(b.has_established_session(ALICE));
    }

    #[test]
    fn stale_handshakes_are_swept() {
        let engine = NoiseEngine::new(MigrationStrategy::None);
        engine.initiate_handshake(BOB).unwrap();

        engine.with_session_mut(BOB, |session| {
            session.force_created_at(SystemTime::now() - Duration::from_secs(120));
        });

        let swept = engine.cleanup_stale_handshakes();
        assert_eq!(swept, vec![BOB.to_string()]);
        assert!(!engine.has_session(BOB));
    }

    #[test]
    fn rekey_candidates_are_reported() {
        let a = NoiseEngine::new(MigrationStrategy::None);
        let b = NoiseEngine::new(MigrationStrategy::None);
        establish(&a, &b);

        assert!(a.sessions_needing_rekey().is_empty());

        a.with_session_mut(BOB, |session| session.force_message_count(950_000_000));
        assert_eq!(a.sessions_needing_rekey(), vec![BOB.to_string()]);
    }
}
