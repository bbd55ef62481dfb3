//! Chat message model and its length-prefixed payload encoding.
//!
//! A `ChatMessage` travels as the payload of MESSAGE packets (plaintext) and
//! NOISE_ENCRYPTED packets (as AEAD plaintext). The encoding is a flags byte,
//! a timestamp, three mandatory length-prefixed fields and a run of optional
//! fields in fixed order, gated by the flag bits.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock;
use crate::protocol::binary::{read_bytes, read_u16, read_u64, read_u8, write_u16, write_u64};
use crate::protocol::ProtocolError;

const FLAG_RELAY: u8 = 0x01;
const FLAG_PRIVATE: u8 = 0x02;
const FLAG_ORIGINAL_SENDER: u8 = 0x04;
const FLAG_RECIPIENT_NICKNAME: u8 = 0x08;
const FLAG_SENDER_PEER_ID: u8 = 0x10;
const FLAG_MENTIONS: u8 = 0x20;
const FLAG_CHANNEL: u8 = 0x40;
const FLAG_ENCRYPTED: u8 = 0x80;

/// Flags + timestamp + id length + sender length + content length.
const MIN_PAYLOAD_SIZE: usize = 13;

/// A single chat message, broadcast or private.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    /// Sender nickname.
    pub sender: String,
    /// Plaintext content; empty while `is_encrypted` is set.
    pub content: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub is_relay: bool,
    pub original_sender: Option<String>,
    pub is_private: bool,
    pub recipient_nickname: Option<String>,
    /// Raw peer id bytes of the sender; rendered as hex on the wire.
    pub sender_peer_id: Vec<u8>,
    pub mentions: Vec<String>,
    /// `None` means the default room.
    pub channel: Option<String>,
    /// Ciphertext occupying the content slot when `is_encrypted` is set.
    pub encrypted_content: Vec<u8>,
    pub is_encrypted: bool,
}

impl ChatMessage {
    /// New broadcast message for a channel (or the default room).
    pub fn new(sender: String, content: String, channel: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            content,
            timestamp: clock::monotonic_timestamp_ms(),
            channel: channel.filter(|c| !c.is_empty()),
            ..Default::default()
        }
    }

    /// New private message addressed to a nickname.
    pub fn new_private(sender: String, content: String, recipient_nickname: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender,
            content,
            timestamp: clock::monotonic_timestamp_ms(),
            is_private: true,
            recipient_nickname: Some(recipient_nickname),
            ..Default::default()
        }
    }

    pub fn display_sender(&self) -> &str {
        if self.sender.is_empty() {
            "anonymous"
        } else {
            &self.sender
        }
    }

    pub fn mentions_user(&self, nickname: &str) -> bool {
        self.mentions.iter().any(|m| m == nickname)
    }

    fn flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.is_relay {
            flags |= FLAG_RELAY;
        }
        if self.is_private {
            flags |= FLAG_PRIVATE;
        }
        if self.original_sender.is_some() {
            flags |= FLAG_ORIGINAL_SENDER;
        }
        if self.recipient_nickname.is_some() {
            flags |= FLAG_RECIPIENT_NICKNAME;
        }
        if !self.sender_peer_id.is_empty() {
            flags |= FLAG_SENDER_PEER_ID;
        }
        if !self.mentions.is_empty() {
            flags |= FLAG_MENTIONS;
        }
        if self.channel.is_some() {
            flags |= FLAG_CHANNEL;
        }
        if self.is_encrypted {
            flags |= FLAG_ENCRYPTED;
        }
        flags
    }

    /// Serialize into the wire payload.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(MIN_PAYLOAD_SIZE + self.content.len());

        data.push(self.flags());
        write_u64(&mut data, self.timestamp);
        push_str_u8(&mut data, &self.id);
        push_str_u8(&mut data, &self.sender);

        if self.is_encrypted {
            let len = self.encrypted_content.len().min(u16::MAX as usize);
            write_u16(&mut data, len as u16);
            data.extend_from_slice(&self.encrypted_content[..len]);
        } else {
            let content = self.content.as_bytes();
            let len = content.len().min(u16::MAX as usize);
            write_u16(&mut data, len as u16);
            data.extend_from_slice(&content[..len]);
        }

        if let Some(original_sender) = &self.original_sender {
            push_str_u8(&mut data, original_sender);
        }

        if let Some(recipient) = &self.recipient_nickname {
            push_str_u8(&mut data, recipient);
        }

        if !self.sender_peer_id.is_empty() {
            push_str_u8(&mut data, &hex::encode(&self.sender_peer_id));
        }

        if !self.mentions.is_empty() {
            let count = self.mentions.len().min(u8::MAX as usize);
            data.push(count as u8);
            for mention in self.mentions.iter().take(count) {
                push_str_u8(&mut data, mention);
            }
        }

        if let Some(channel) = &self.channel {
            push_str_u8(&mut data, channel);
        }

        data
    }

    /// Parse a wire payload back into a message.
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < MIN_PAYLOAD_SIZE {
            return Err(ProtocolError::TooShort(payload.len()));
        }

        let mut offset = 0;
        let flags = read_u8(payload, &mut offset, "message flags")?;
        let timestamp = read_u64(payload, &mut offset, "message timestamp")?;
        let id = read_str_u8(payload, &mut offset, "message id")?;
        let sender = read_str_u8(payload, &mut offset, "sender nickname")?;

        let content_len = read_u16(payload, &mut offset, "content length")? as usize;
        let content_bytes = read_bytes(payload, &mut offset, content_len, "content")?;

        let is_encrypted = flags & FLAG_ENCRYPTED != 0;
        let (content, encrypted_content) = if is_encrypted {
            (String::new(), content_bytes.to_vec())
        } else {
            (String::from_utf8_lossy(content_bytes).into_owned(), Vec::new())
        };

        let original_sender = if flags & FLAG_ORIGINAL_SENDER != 0 {
            Some(read_str_u8(payload, &mut offset, "original sender")?)
        } else {
            None
        };

        let recipient_nickname = if flags & FLAG_RECIPIENT_NICKNAME != 0 {
            Some(read_str_u8(payload, &mut offset, "recipient nickname")?)
        } else {
            None
        };

        let sender_peer_id = if flags & FLAG_SENDER_PEER_ID != 0 {
            let peer_hex = read_str_u8(payload, &mut offset, "sender peer id")?;
            hex::decode(&peer_hex).unwrap_or_default()
        } else {
            Vec::new()
        };

        let mentions = if flags & FLAG_MENTIONS != 0 {
            let count = read_u8(payload, &mut offset, "mention count")? as usize;
            let mut mentions = Vec::with_capacity(count);
            for _ in 0..count {
                mentions.push(read_str_u8(payload, &mut offset, "mention")?);
            }
            mentions
        } else {
            Vec::new()
        };

        let channel = if flags & FLAG_CHANNEL != 0 {
            Some(read_str_u8(payload, &mut offset, "channel")?)
        } else {
            None
        };

        Ok(Self {
            id,
            sender,
            content,
            timestamp,
            is_relay: flags & FLAG_RELAY != 0,
            original_sender,
            is_private: flags & FLAG_PRIVATE != 0,
            recipient_nickname,
            sender_peer_id,
            mentions,
            channel,
            encrypted_content,
            is_encrypted,
        })
    }
}

fn push_str_u8(buffer: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(u8::MAX as usize);
    buffer.push(len as u8);
    buffer.extend_from_slice(&bytes[..len]);
}

fn read_str_u8(
    payload: &[u8],
    offset: &mut usize,
    field: &'static str,
) -> Result<String, ProtocolError> {
    let len = read_u8(payload, offset, field)? as usize;
    let bytes = read_bytes(payload, offset, len, field)?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}
