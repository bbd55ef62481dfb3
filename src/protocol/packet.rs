//! Wire packet model.
//!
//! A packet is the unit every transport carries: a 13-byte header, an 8-byte
//! sender id, optional recipient and signature fields and an opaque payload.
//! Payload interpretation belongs to the message layer.

use serde::{Deserialize, Serialize};

use crate::clock;
use crate::constants::PROTOCOL_VERSION;

/// Default TTL for packets entering the mesh.
pub const PACKET_TTL: u8 = 7;

/// TTL applied by the generic packet factory.
pub const MAKE_PACKET_TTL: u8 = 6;

/// Recipient id meaning "every peer".
pub const BROADCAST_RECIPIENT: [u8; 8] = [0xFF; 8];

/// Packet type enumeration. Unknown values survive decoding so they can be
/// relayed even when this node has no handler for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketType {
    Announce,
    KeyExchange,
    Leave,
    Message,
    FragmentStart,
    FragmentContinue,
    FragmentEnd,
    ChannelAnnounce,
    DeliveryAck,
    DeliveryStatusRequest,
    ReadReceipt,
    NoiseHandshakeInit,
    NoiseHandshakeResp,
    NoiseEncrypted,
    NoiseIdentityAnnounce,
    ChannelKeyVerifyRequest,
    ChannelKeyVerifyResponse,
    ChannelPasswordUpdate,
    ChannelMetadata,
    VersionHello,
    VersionAck,
    Unknown(u8),
}

impl PacketType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => PacketType::Announce,
            0x02 => PacketType::KeyExchange,
            0x03 => PacketType::Leave,
            0x04 => PacketType::Message,
            0x05 => PacketType::FragmentStart,
            0x06 => PacketType::FragmentContinue,
            0x07 => PacketType::FragmentEnd,
            0x08 => PacketType::ChannelAnnounce,
            0x0A => PacketType::DeliveryAck,
            0x0B => PacketType::DeliveryStatusRequest,
            0x0C => PacketType::ReadReceipt,
            0x10 => PacketType::NoiseHandshakeInit,
            0x11 => PacketType::NoiseHandshakeResp,
            0x12 => PacketType::NoiseEncrypted,
            0x13 => PacketType::NoiseIdentityAnnounce,
            0x14 => PacketType::ChannelKeyVerifyRequest,
            0x15 => PacketType::ChannelKeyVerifyResponse,
            0x16 => PacketType::ChannelPasswordUpdate,
            0x17 => PacketType::ChannelMetadata,
            0x20 => PacketType::VersionHello,
            0x21 => PacketType::VersionAck,
            other => PacketType::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            PacketType::Announce => 0x01,
            PacketType::KeyExchange => 0x02,
            PacketType::Leave => 0x03,
            PacketType::Message => 0x04,
            PacketType::FragmentStart => 0x05,
            PacketType::FragmentContinue => 0x06,
            PacketType::FragmentEnd => 0x07,
            PacketType::ChannelAnnounce => 0x08,
            PacketType::DeliveryAck => 0x0A,
            PacketType::DeliveryStatusRequest => 0x0B,
            PacketType::ReadReceipt => 0x0C,
            PacketType::NoiseHandshakeInit => 0x10,
            PacketType::NoiseHandshakeResp => 0x11,
            PacketType::NoiseEncrypted => 0x12,
            PacketType::NoiseIdentityAnnounce => 0x13,
            PacketType::ChannelKeyVerifyRequest => 0x14,
            PacketType::ChannelKeyVerifyResponse => 0x15,
            PacketType::ChannelPasswordUpdate => 0x16,
            PacketType::ChannelMetadata => 0x17,
            PacketType::VersionHello => 0x20,
            PacketType::VersionAck => 0x21,
            PacketType::Unknown(other) => *other,
        }
    }
}

/// Header flag bits for optional fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PacketFlags {
    pub has_recipient: bool,
    pub has_signature: bool,
    pub is_compressed: bool,
}

impl PacketFlags {
    pub fn to_byte(&self) -> u8 {
        let mut flags = 0u8;
        if self.has_recipient {
            flags |= 0x01;
        }
        if self.has_signature {
            flags |= 0x02;
        }
        if self.is_compressed {
            flags |= 0x04;
        }
        flags
    }

    pub fn from_byte(byte: u8) -> Self {
        Self {
            has_recipient: (byte & 0x01) != 0,
            has_signature: (byte & 0x02) != 0,
            is_compressed: (byte & 0x04) != 0,
        }
    }
}

/// Decoded wire packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub version: u8,
    pub packet_type: PacketType,
    pub ttl: u8,
    /// Milliseconds since the Unix epoch, strictly increasing per originator.
    pub timestamp: u64,
    pub flags: PacketFlags,
    pub sender_id: [u8; 8],
    pub recipient_id: Option<[u8; 8]>,
    pub payload: Vec<u8>,
    pub signature: Option<[u8; 64]>,
}

impl Packet {
    /// Create a packet with the default mesh TTL and a fresh timestamp.
    pub fn new(packet_type: PacketType, sender_id: [u8; 8], payload: Vec<u8>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            packet_type,
            ttl: PACKET_TTL,
            timestamp: clock::monotonic_timestamp_ms(),
            flags: PacketFlags::default(),
            sender_id,
            recipient_id: None,
            payload,
            signature: None,
        }
    }

    /// Set a recipient for targeted packets.
    pub fn with_recipient(mut self, recipient_id: [u8; 8]) -> Self {
        self.recipient_id = Some(recipient_id);
        self.flags.has_recipient = true;
        self
    }

    /// Address the packet to every peer.
    pub fn with_broadcast_recipient(self) -> Self {
        self.with_recipient(BROADCAST_RECIPIENT)
    }

    /// Attach an Ed25519 signature over the payload.
    pub fn with_signature(mut self, signature: [u8; 64]) -> Self {
        self.signature = Some(signature);
        self.flags.has_signature = true;
        self
    }

    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Copy with TTL decreased by one, or `None` once the budget is spent.
    pub fn decrement_ttl(&self) -> Option<Self> {
        if self.ttl == 0 {
            return None;
        }

        let mut relayed = self.clone();
        relayed.ttl -= 1;
        Some(relayed)
    }

    /// Sender id in its human-facing hex rendering.
    pub fn sender_id_hex(&self) -> String {
        hex::encode(self.sender_id)
    }

    pub fn is_broadcast(&self) -> bool {
        matches!(self.recipient_id, Some(id) if id == BROADCAST_RECIPIENT)
    }

    /// Dedup fingerprint: unique per originator because timestamps are
    /// monotonic per sender.
    pub fn dedup_key(&self) -> String {
        format!("{}_{}", self.sender_id_hex(), self.timestamp)
    }
}

/// Convert a 16-hex-char peer id to its 8 raw wire bytes. Shorter input is
/// zero-padded on the right, longer input is truncated.
pub fn sender_bytes_from_hex(peer_id: &str) -> [u8; 8] {
    let mut bytes = [0u8; 8];
    let decoded = hex::decode(peer_id).unwrap_or_default();

    for (slot, byte) in bytes.iter_mut().zip(decoded.iter()) {
        *slot = *byte;
    }

    bytes
}
