//! Node configuration.
//!
//! Identity overrides plus the timing and capacity tunables a deployment
//! actually varies: loop cadences, the peer staleness window and the store
//! caps. Protocol-level limits (packet sizes, session message caps, rate
//! limits) are part of the wire contract and stay in `constants`.

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    ANNOUNCE_INTERVAL, CLEANUP_INTERVAL, KEY_FILE, MAX_HISTORY_SIZE, MAX_PROCESSED_MESSAGES,
    PEER_TIMEOUT,
};
use crate::crypto::MigrationStrategy;

#[derive(Debug, Clone)]
pub struct Config {
    /// Nickname to announce; random `anonNNNN` when unset.
    pub nickname: Option<String>,
    /// Fixed peer id (16 hex chars); random when unset.
    pub peer_id: Option<String>,
    /// Where the signing key persists.
    pub key_path: PathBuf,
    pub migration_strategy: MigrationStrategy,
    /// Presence announce cadence.
    pub announce_interval: Duration,
    /// Housekeeping cadence.
    pub cleanup_interval: Duration,
    /// Peers unheard from for this long are evicted.
    pub peer_timeout: Duration,
    /// Per-channel history cap; oldest messages drop first.
    pub max_history: usize,
    /// Processed-fingerprint set cap; cleared wholesale on overflow.
    pub max_processed: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nickname: None,
            peer_id: None,
            key_path: PathBuf::from(KEY_FILE),
            migration_strategy: MigrationStrategy::None,
            announce_interval: ANNOUNCE_INTERVAL,
            cleanup_interval: CLEANUP_INTERVAL,
            peer_timeout: PEER_TIMEOUT,
            max_history: MAX_HISTORY_SIZE,
            max_processed: MAX_PROCESSED_MESSAGES,
        }
    }
}
