//! Tracked neighbor model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// RSSI placeholder until the transport reports a measurement.
pub const RSSI_UNKNOWN: i16 = -100;

/// A peer this node has heard from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    /// 16-hex-character peer id.
    pub peer_id: String,
    /// Transport link handle this peer was last heard on.
    pub link_id: String,
    pub nickname: String,
    /// Channel the peer last announced; empty means the default room.
    pub channel: String,
    pub last_seen: DateTime<Utc>,
    pub rssi: i16,
    /// Set once the peer's ANNOUNCE has been processed.
    pub has_announced: bool,
}

impl Peer {
    pub fn new(peer_id: String, nickname: String) -> Self {
        Self {
            peer_id,
            link_id: String::new(),
            nickname,
            channel: String::new(),
            last_seen: Utc::now(),
            rssi: RSSI_UNKNOWN,
            has_announced: false,
        }
    }

    pub fn update_last_seen(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Unheard from for longer than `timeout`.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.last_seen);
        age.num_milliseconds() > timeout.as_millis() as i64
    }

    pub fn display_name(&self) -> &str {
        if self.nickname.is_empty() {
            &self.peer_id
        } else {
            &self.nickname
        }
    }
}
