//! Post-quantum migration strategy.
//!
//! The strategy selects which handshake pattern a node announces while the
//! network transitions to hybrid key exchange. Until a real KEM is wired in,
//! every strategy executes the classical XX pattern; only the announced
//! string differs.

use serde::{Deserialize, Serialize};

use super::noise::NOISE_PROTOCOL_NAME;

/// Announced pattern for nodes preferring post-quantum XX.
pub const PATTERN_XX_PQ: &str = "Noise_XX_PQ_25519_ChaChaPoly_SHA256";

/// Announced pattern for nodes requiring post-quantum IK.
pub const PATTERN_IK_PQ: &str = "Noise_IK_PQ_25519_ChaChaPoly_SHA256";

/// Announced pattern for nodes that fall back when the peer lacks PQ support.
pub const PATTERN_XX_FALLBACK_PQ: &str = "Noise_XXfallback_PQ_25519_ChaChaPoly_SHA256";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationStrategy {
    /// Classical handshakes only.
    #[default]
    None,
    /// Announce PQ support, keep interoperating with classical peers.
    Gradual,
    /// Announce PQ as required.
    Immediate,
    /// Announce the fallback pattern for mixed networks.
    Fallback,
}

impl MigrationStrategy {
    /// Pattern string announced to peers.
    pub fn announced_pattern(&self) -> &'static str {
        match self {
            MigrationStrategy::None => NOISE_PROTOCOL_NAME,
            MigrationStrategy::Gradual => PATTERN_XX_PQ,
            MigrationStrategy::Immediate => PATTERN_IK_PQ,
            MigrationStrategy::Fallback => PATTERN_XX_FALLBACK_PQ,
        }
    }

    /// Pattern actually executed. Classical XX across the board until a KEM
    /// implementation exists.
    pub fn handshake_pattern(&self) -> &'static str {
        NOISE_PROTOCOL_NAME
    }
}
