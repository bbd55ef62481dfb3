//! Binary packet codec.
//!
//! Serializes packets into the big-endian wire layout and back: a 13-byte
//! header (version, type, TTL, timestamp, flags), a 2-byte payload length,
//! the 8-byte sender id, then the optional recipient, the payload (with a
//! 2-byte original-size prefix when compressed) and the optional 64-byte
//! signature. The assembled bytes are padded to a standard block size before
//! hitting the wire.

use log::{debug, warn};
use thiserror::Error;

use super::compression;
use super::packet::{Packet, PacketFlags, PacketType, MAKE_PACKET_TTL};
use super::padding;
use crate::clock;
use crate::constants::PROTOCOL_VERSION;

/// Fixed header length: version + type + TTL + timestamp + flags +
/// payload length.
const HEADER_SIZE: usize = 13;

/// Header plus the mandatory sender id.
const MIN_DECODED_SIZE: usize = HEADER_SIZE + 8;

/// Codec failures. Every variant causes the offending packet to be dropped
/// by the caller; none of them is fatal to the node.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("packet too short: {0} bytes (minimum {MIN_DECODED_SIZE})")]
    TooShort(usize),

    #[error("packet size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    #[error("payload decompression failed")]
    DecompressionFailed,

    #[error("truncated field: {0}")]
    TruncatedField(&'static str),
}

pub(crate) fn write_u16(buffer: &mut Vec<u8>, value: u16) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u64(buffer: &mut Vec<u8>, value: u64) {
    buffer.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn read_u8(data: &[u8], offset: &mut usize, field: &'static str) -> Result<u8, ProtocolError> {
    let value = *data
        .get(*offset)
        .ok_or(ProtocolError::TruncatedField(field))?;
    *offset += 1;
    Ok(value)
}

pub(crate) fn read_u16(data: &[u8], offset: &mut usize, field: &'static str) -> Result<u16, ProtocolError> {
    let end = *offset + 2;
    let bytes = data
        .get(*offset..end)
        .ok_or(ProtocolError::TruncatedField(field))?;
    *offset = end;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u64(data: &[u8], offset: &mut usize, field: &'static str) -> Result<u64, ProtocolError> {
    let end = *offset + 8;
    let bytes = data
        .get(*offset..end)
        .ok_or(ProtocolError::TruncatedField(field))?;
    *offset = end;

    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(raw))
}

pub(crate) fn read_bytes<'a>(
    data: &'a [u8],
    offset: &mut usize,
    len: usize,
    field: &'static str,
) -> Result<&'a [u8], ProtocolError> {
    let end = *offset + len;
    let bytes = data
        .get(*offset..end)
        .ok_or(ProtocolError::TruncatedField(field))?;
    *offset = end;
    Ok(bytes)
}

/// Stateless packet serializer.
pub struct PacketCodec;

impl PacketCodec {
    /// Encode a packet into padded wire bytes.
    pub fn encode(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
        // Compress only when it pays off.
        let mut payload = packet.payload.clone();
        let mut original_size = 0u16;
        let mut is_compressed = false;

        if compression::should_compress(&packet.payload) {
            if let Some(compressed) = compression::compress(&packet.payload) {
                original_size = packet.payload.len() as u16;
                payload = compressed;
                is_compressed = true;
            }
        }

        let payload_len = payload.len() + if is_compressed { 2 } else { 0 };
        if packet.payload.len() > u16::MAX as usize || payload_len > u16::MAX as usize {
            return Err(ProtocolError::SizeMismatch {
                expected: u16::MAX as usize,
                actual: packet.payload.len(),
            });
        }

        let mut flags = packet.flags;
        flags.is_compressed = is_compressed;

        let mut data = Vec::with_capacity(MIN_DECODED_SIZE + payload_len);
        data.push(packet.version);
        data.push(packet.packet_type.as_u8());
        data.push(packet.ttl);
        write_u64(&mut data, packet.timestamp);
        data.push(flags.to_byte());
        write_u16(&mut data, payload_len as u16);
        data.extend_from_slice(&packet.sender_id);

        if flags.has_recipient {
            data.extend_from_slice(&packet.recipient_id.unwrap_or_default());
        }

        if is_compressed {
            write_u16(&mut data, original_size);
        }
        data.extend_from_slice(&payload);

        if flags.has_signature {
            data.extend_from_slice(&packet.signature.unwrap_or([0u8; 64]));
        }

        let block = padding::optimal_block_size(data.len());
        Ok(padding::pad(&data, block))
    }

    /// Decode padded wire bytes back into a packet.
    pub fn decode(data: &[u8]) -> Result<Packet, ProtocolError> {
        let data = padding::unpad(data);

        if data.len() < MIN_DECODED_SIZE {
            return Err(ProtocolError::TooShort(data.len()));
        }

        let mut offset = 0;
        let version = read_u8(&data, &mut offset, "version")?;
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let packet_type = PacketType::from_u8(read_u8(&data, &mut offset, "type")?);
        let ttl = read_u8(&data, &mut offset, "ttl")?;
        let timestamp = read_u64(&data, &mut offset, "timestamp")?;
        let flags = PacketFlags::from_byte(read_u8(&data, &mut offset, "flags")?);
        let payload_len = read_u16(&data, &mut offset, "payload length")? as usize;

        let mut expected = MIN_DECODED_SIZE + payload_len;
        if flags.has_recipient {
            expected += 8;
        }
        if flags.has_signature {
            expected += 64;
        }

        if expected != data.len() {
            return Err(ProtocolError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        let mut sender_id = [0u8; 8];
        sender_id.copy_from_slice(read_bytes(&data, &mut offset, 8, "sender id")?);

        let recipient_id = if flags.has_recipient {
            let mut recipient = [0u8; 8];
            recipient.copy_from_slice(read_bytes(&data, &mut offset, 8, "recipient id")?);
            Some(recipient)
        } else {
            None
        };

        let payload = if flags.is_compressed {
            if payload_len < 2 {
                return Err(ProtocolError::TruncatedField("original size"));
            }

            let original_size = read_u16(&data, &mut offset, "original size")? as usize;
            let compressed = read_bytes(&data, &mut offset, payload_len - 2, "payload")?;
            compression::decompress(compressed, original_size)?
        } else {
            read_bytes(&data, &mut offset, payload_len, "payload")?.to_vec()
        };

        let signature = if flags.has_signature {
            let mut sig = [0u8; 64];
            sig.copy_from_slice(read_bytes(&data, &mut offset, 64, "signature")?);
            Some(sig)
        } else {
            None
        };

        Ok(Packet {
            version,
            packet_type,
            ttl,
            timestamp,
            flags,
            sender_id,
            recipient_id,
            payload,
            signature,
        })
    }

    /// Generic packet factory used by callers that only have a payload and a
    /// type: fills in timestamp, sender and the originated-packet TTL.
    pub fn make_packet(
        packet_type: PacketType,
        payload: Vec<u8>,
        sender_id: [u8; 8],
        broadcast: bool,
    ) -> Packet {
        let mut packet = Packet {
            version: PROTOCOL_VERSION,
            packet_type,
            ttl: MAKE_PACKET_TTL,
            timestamp: clock::monotonic_timestamp_ms(),
            flags: PacketFlags::default(),
            sender_id,
            recipient_id: None,
            payload,
            signature: None,
        };

        if broadcast {
            packet = packet.with_broadcast_recipient();
        }

        packet
    }

    /// ANNOUNCE payload: the nickname as raw UTF-8.
    pub fn make_announce_payload(nickname: &str) -> Vec<u8> {
        nickname.as_bytes().to_vec()
    }

    pub fn parse_announce_payload(payload: &[u8]) -> String {
        String::from_utf8_lossy(payload).into_owned()
    }

    /// CHANNEL_ANNOUNCE payload: join flag, then a length-prefixed channel
    /// name.
    pub fn make_channel_announce_payload(channel: &str, joining: bool) -> Vec<u8> {
        let name = channel.as_bytes();
        let len = name.len().min(u8::MAX as usize);

        let mut data = Vec::with_capacity(2 + len);
        data.push(joining as u8);
        data.push(len as u8);
        data.extend_from_slice(&name[..len]);
        data
    }

    pub fn parse_channel_announce_payload(payload: &[u8]) -> Result<(String, bool), ProtocolError> {
        let mut offset = 0;
        let joining = read_u8(payload, &mut offset, "join flag")? != 0;
        let len = read_u8(payload, &mut offset, "channel length")? as usize;
        let name = read_bytes(payload, &mut offset, len, "channel name")?;

        Ok((String::from_utf8_lossy(name).into_owned(), joining))
    }

    /// NOISE_IDENTITY_ANNOUNCE payload: the hex peer id as raw UTF-8.
    pub fn make_identity_announce_payload(peer_id: &str) -> Vec<u8> {
        peer_id.as_bytes().to_vec()
    }

    /// Decode wire bytes, logging instead of propagating so transport event
    /// pumps can stay loop-shaped.
    pub fn try_decode(data: &[u8], link_id: &str) -> Option<Packet> {
        match Self::decode(data) {
            Ok(packet) => {
                debug!(
                    "Decoded {:?} packet ({} payload bytes) from link {}",
                    packet.packet_type,
                    packet.payload.len(),
                    link_id
                );
                Some(packet)
            }
            Err(e) => {
                warn!("Dropping undecodable packet from link {}: {}", link_id, e);
                None
            }
        }
    }
}
