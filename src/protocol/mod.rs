//! Binary wire protocol: packet model, codec, padding, compression and
//! identifier validation.

pub mod binary;
pub mod compression;
pub mod packet;
pub mod padding;
pub mod validation;

pub use binary::{PacketCodec, ProtocolError};
pub use packet::{
    sender_bytes_from_hex, Packet, PacketFlags, PacketType, BROADCAST_RECIPIENT, PACKET_TTL,
};
pub use validation::{
    validate_channel_name, validate_nickname, validate_peer_id, ValidationError,
};
