//! Input validation for user-facing identifiers.
//!
//! Invalid identifiers never reach the wire; they surface as descriptive
//! status errors through the UI layer.

use thiserror::Error;

use crate::constants::PEER_ID_HEX_LEN;

/// Longest accepted channel name, `#` included.
const MAX_CHANNEL_LEN: usize = 50;

/// Longest accepted nickname.
const MAX_NICKNAME_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid peer id: {0:?}")]
    InvalidPeerId(String),

    #[error("invalid channel name: {0:?}")]
    InvalidChannelName(String),

    #[error("invalid nickname: {0:?}")]
    InvalidNickname(String),
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Peer ids are exactly 16 lowercase-insensitive hex digits.
pub fn validate_peer_id(peer_id: &str) -> Result<(), ValidationError> {
    if peer_id.len() == PEER_ID_HEX_LEN && peer_id.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidPeerId(peer_id.to_string()))
    }
}

/// Channels start with `#`, stay within 50 characters and use only
/// alphanumerics, `_` and `-` in the body.
pub fn validate_channel_name(channel: &str) -> Result<(), ValidationError> {
    let mut chars = channel.chars();

    let valid = chars.next() == Some('#')
        && channel.len() > 1
        && channel.len() <= MAX_CHANNEL_LEN
        && chars.all(is_name_char);

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidChannelName(channel.to_string()))
    }
}

/// Nicknames are non-empty, at most 32 characters, alphanumerics plus `_`
/// and `-`.
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    let valid = !nickname.is_empty()
        && nickname.len() <= MAX_NICKNAME_LEN
        && nickname.chars().all(is_name_char);

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidNickname(nickname.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_id_rules() {
        assert!(validate_peer_id("00aaBBccDDeeFF11").is_ok());
        assert!(validate_peer_id("0011223344556677").is_ok());
        assert!(validate_peer_id("0011").is_err());
        assert!(validate_peer_id("00112233445566zz").is_err());
        assert!(validate_peer_id("001122334455667788").is_err());
    }

    #[test]
    fn channel_rules() {
        assert!(validate_channel_name("#general").is_ok());
        assert!(validate_channel_name("#rust_lang-2024").is_ok());
        assert!(validate_channel_name("general").is_err());
        assert!(validate_channel_name("#").is_err());
        assert!(validate_channel_name("#has space").is_err());
        assert!(validate_channel_name(&format!("#{}", "a".repeat(50))).is_err());
        assert!(validate_channel_name(&format!("#{}", "a".repeat(49))).is_ok());
    }

    #[test]
    fn nickname_rules() {
        assert!(validate_nickname("alice").is_ok());
        assert!(validate_nickname("anon1234").is_ok());
        assert!(validate_nickname("").is_err());
        assert!(validate_nickname("way too long".repeat(4).as_str()).is_err());
        assert!(validate_nickname("bad name").is_err());
    }
}
