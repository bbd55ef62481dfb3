//! Process-wide shared state.
//!
//! One owned value injected by `Arc` into every subsystem: local identity
//! fields, the ordered peer table, bounded per-channel history and the
//! processed-packet fingerprint set that backs flood dedup. Each field sits
//! behind its own lock and critical sections stay single-operation, so the
//! router, the loops and transport callbacks never contend for long.

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;
use rand::RngCore;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use std::time::Duration;

use super::peer::Peer;
use crate::constants::{MAX_HISTORY_SIZE, MAX_PROCESSED_MESSAGES, PEER_TIMEOUT};
use crate::message::ChatMessage;

/// History bucket for private messages without a channel.
pub const PRIVATE_BUCKET: &str = "private";

/// Generate a fresh 8-byte peer id, hex encoded.
pub fn random_peer_id() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Default nickname for nodes that never set one.
pub fn random_nickname() -> String {
    let n = 1000 + (rand::thread_rng().next_u32() % 9000);
    format!("anon{n}")
}

pub struct MeshState {
    peer_id: RwLock<String>,
    nickname: RwLock<String>,
    current_channel: RwLock<String>,
    peers: RwLock<Vec<Peer>>,
    history: RwLock<HashMap<String, VecDeque<ChatMessage>>>,
    processed: RwLock<HashSet<String>>,
    peer_timeout: Duration,
    max_history: usize,
    max_processed: usize,
}

impl MeshState {
    pub fn new(peer_id: String, nickname: String) -> Self {
        Self::with_limits(
            peer_id,
            nickname,
            PEER_TIMEOUT,
            MAX_HISTORY_SIZE,
            MAX_PROCESSED_MESSAGES,
        )
    }

    /// Store with configured staleness window and capacity caps.
    pub fn with_limits(
        peer_id: String,
        nickname: String,
        peer_timeout: Duration,
        max_history: usize,
        max_processed: usize,
    ) -> Self {
        Self {
            peer_id: RwLock::new(peer_id),
            nickname: RwLock::new(nickname),
            current_channel: RwLock::new(String::new()),
            peers: RwLock::new(Vec::new()),
            history: RwLock::new(HashMap::new()),
            processed: RwLock::new(HashSet::new()),
            peer_timeout,
            max_history,
            max_processed,
        }
    }

    // Identity

    pub async fn peer_id(&self) -> String {
        self.peer_id.read().await.clone()
    }

    pub async fn set_peer_id(&self, peer_id: String) {
        *self.peer_id.write().await = peer_id;
    }

    pub async fn nickname(&self) -> String {
        self.nickname.read().await.clone()
    }

    pub async fn set_nickname(&self, nickname: String) {
        *self.nickname.write().await = nickname;
    }

    pub async fn current_channel(&self) -> String {
        self.current_channel.read().await.clone()
    }

    pub async fn set_current_channel(&self, channel: String) {
        *self.current_channel.write().await = channel;
    }

    // Peer table

    pub async fn peers(&self) -> Vec<Peer> {
        self.peers.read().await.clone()
    }

    pub async fn peers_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peer_info(&self, peer_id: &str) -> Option<Peer> {
        self.peers
            .read()
            .await
            .iter()
            .find(|p| p.peer_id == peer_id)
            .cloned()
    }

    pub async fn peer_by_nickname(&self, nickname: &str) -> Option<Peer> {
        self.peers
            .read()
            .await
            .iter()
            .find(|p| p.nickname == nickname)
            .cloned()
    }

    /// Insert or replace a peer row, keyed by peer id.
    pub async fn upsert_peer(&self, peer: Peer) {
        let mut peers = self.peers.write().await;

        match peers.iter_mut().find(|p| p.peer_id == peer.peer_id) {
            Some(existing) => *existing = peer,
            None => peers.push(peer),
        }
    }

    pub async fn remove_peer(&self, peer_id: &str) -> Option<Peer> {
        let mut peers = self.peers.write().await;
        let index = peers.iter().position(|p| p.peer_id == peer_id)?;
        Some(peers.remove(index))
    }

    pub async fn is_peer_online(&self, peer_id: &str) -> bool {
        self.peers
            .read()
            .await
            .iter()
            .find(|p| p.peer_id == peer_id)
            .map(|p| !p.is_stale(self.peer_timeout))
            .unwrap_or(false)
    }

    /// Drop peers unheard from past the staleness window; returns the
    /// evicted rows.
    pub async fn cleanup_stale_peers(&self) -> Vec<Peer> {
        let mut peers = self.peers.write().await;
        let mut removed = Vec::new();

        peers.retain(|peer| {
            if peer.is_stale(self.peer_timeout) {
                removed.push(peer.clone());
                false
            } else {
                true
            }
        });

        if !removed.is_empty() {
            debug!("Evicted {} stale peers", removed.len());
        }

        removed
    }

    // Message history

    /// Append to a channel bucket, dropping the oldest entry at the cap.
    pub async fn add_message_to_history(&self, message: ChatMessage, bucket: &str) {
        let mut history = self.history.write().await;
        let messages = history.entry(bucket.to_string()).or_default();

        messages.push_back(message);
        while messages.len() > self.max_history {
            messages.pop_front();
        }
    }

    pub async fn history(&self, bucket: &str) -> Vec<ChatMessage> {
        self.history
            .read()
            .await
            .get(bucket)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn clear_history(&self, bucket: &str) {
        self.history.write().await.remove(bucket);
    }

    pub async fn clear_all_history(&self) {
        self.history.write().await.clear();
    }

    // Processed-packet fingerprints

    /// Record a dedup key. Returns `true` when the key was new. The set is
    /// cleared wholesale on overflow, trading a brief dedup gap for bounded
    /// memory.
    pub async fn mark_processed(&self, key: &str) -> bool {
        let mut processed = self.processed.write().await;

        if processed.len() >= self.max_processed {
            debug!("Processed-set cap reached; clearing {} entries", processed.len());
            processed.clear();
        }

        processed.insert(key.to_string())
    }

    pub async fn was_processed(&self, key: &str) -> bool {
        self.processed.read().await.contains(key)
    }

    pub async fn statistics(&self) -> Value {
        let history = self.history.read().await;
        let history_sizes: HashMap<&String, usize> =
            history.iter().map(|(k, v)| (k, v.len())).collect();

        json!({
            "peer_id": self.peer_id().await,
            "nickname": self.nickname().await,
            "current_channel": self.current_channel().await,
            "peers": self.peers_count().await,
            "history": history_sizes,
            "processed": self.processed.read().await.len(),
        })
    }
}
