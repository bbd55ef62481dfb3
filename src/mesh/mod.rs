//! Mesh networking: the transport contract, the flood relay and the
//! announce/cleanup background loops.

pub mod announce;
pub mod cleanup;
pub mod relay;
pub mod transport;

pub use announce::AnnounceRunner;
pub use cleanup::CleanupRunner;
pub use relay::MeshRelay;
pub use transport::{
    Transport, TransportError, TransportEvent, TransportEventReceiver, TransportEventSender,
};
