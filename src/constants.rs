//! Protocol-wide constants.
//!
//! The codec, router, loops and session layer all agree on these limits;
//! keeping them in one place mirrors the tunable-parameter table the wire
//! protocol is specified against.

use std::time::Duration;

/// Protocol version carried in every packet header.
pub const PROTOCOL_VERSION: u8 = 1;

/// Service UUID advertised by BLE transports.
pub const SERVICE_UUID: &str = "F47B5E2D-4A9E-4C5A-9B3F-8E1D2C3A4B5C";

/// Characteristic UUID used for packet exchange on BLE transports.
pub const CHARACTERISTIC_UUID: &str = "A1B2C3D4-E5F6-4A5B-8C9D-0E1F2A3B4C5D";

/// Interval between scan windows, for transports that poll.
pub const SCAN_INTERVAL: Duration = Duration::from_millis(100);

/// Timeout for establishing a single link.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Smallest parseable packet: 13-byte header plus 8-byte sender id.
pub const MIN_PACKET_SIZE: usize = 21;

/// Largest packet simple transports are expected to carry. The codec itself
/// handles payloads up to 65535 bytes; anything beyond this is the
/// fragmentation layer's problem.
pub const MAX_PACKET_SIZE: usize = 512;

/// Peer ids render as 16 lowercase hex characters (8 raw bytes).
pub const PEER_ID_HEX_LEN: usize = 16;

/// Bounded per-channel message history.
pub const MAX_HISTORY_SIZE: usize = 1000;

/// Bounded processed-packet fingerprint set. Cleared wholesale on overflow.
pub const MAX_PROCESSED_MESSAGES: usize = 1000;

/// Peers unheard from for this long are evicted by the cleanup loop.
pub const PEER_TIMEOUT: Duration = Duration::from_secs(180);

/// Presence announce cadence.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(15);

/// Cleanup loop cadence.
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Noise sessions expire after this long regardless of activity.
pub const NOISE_SESSION_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Hard cap on messages per Noise session.
pub const NOISE_MAX_MESSAGES_PER_SESSION: u64 = 1_000_000_000;

/// Sessions report `needs_renegotiation` at this fraction of the cap.
pub const NOISE_REKEY_THRESHOLD: f64 = 0.9;

/// Handshakes that make no progress for this long are abandoned.
pub const NOISE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest Noise transport message.
pub const NOISE_MAX_MESSAGE_SIZE: usize = 65535;

/// Per-peer handshake rate limit.
pub const NOISE_MAX_HANDSHAKES_PER_MINUTE: usize = 10;

/// Per-peer inbound message rate limit.
pub const NOISE_MAX_MESSAGES_PER_SECOND: usize = 100;

/// File the local signing key persists to, PEM encoded.
pub const KEY_FILE: &str = "bitchat-pk.pem";
