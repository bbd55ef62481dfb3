//! Shared concurrent state: identity, peer table, history and dedup set.

pub mod peer;
pub mod store;

pub use peer::Peer;
pub use store::{random_nickname, random_peer_id, MeshState, PRIVATE_BUCKET};
