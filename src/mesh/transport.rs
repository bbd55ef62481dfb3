//! Transport adapter contract.
//!
//! The core runs against any adapter that can advertise presence, keep a
//! reliable byte stream per neighbor and deliver framed packets upward. An
//! adapter MUST deliver exactly one encoded packet per event; where the
//! underlying medium is a stream, the adapter owns reassembly and resyncs on
//! malformed prefixes by shifting a single byte and retrying. Link ids are
//! adapter-assigned handles; they map to at most one peer id once that peer
//! announces.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

/// Events an adapter pushes into the core.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// One complete encoded packet arrived on `link_id`.
    PacketReceived { data: Vec<u8>, link_id: String },
    /// A link came up, before any protocol traffic.
    PeerConnected { link_id: String },
    /// A link dropped. The peer row is evicted lazily by the cleanup loop,
    /// tolerating transient blips.
    PeerDisconnected { link_id: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport not ready")]
    NotReady,

    #[error("send failed on link {0}")]
    SendFailed(String),

    #[error("link dropped: {0}")]
    LinkDropped(String),
}

/// Sender half the adapter uses to surface events.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half the core's event pump consumes.
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Platform transport the core drives. Implementations own all link state
/// and never reference protocol state.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Bring up the platform subsystem.
    async fn init(&self) -> Result<(), TransportError>;

    /// Start advertising and scanning; events flow through `events` from
    /// this point on.
    async fn start(&self, events: TransportEventSender) -> Result<(), TransportError>;

    /// Stop all transport activity and close every link.
    async fn stop(&self);

    /// Deliver encoded bytes to every connected neighbor.
    async fn send(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Deliver encoded bytes to the neighbor that announced `peer_id`.
    async fn send_to(&self, data: &[u8], peer_id: &str) -> Result<(), TransportError>;

    fn is_ready(&self) -> bool;

    fn connected_count(&self) -> usize;
}
