//! Flood relay.
//!
//! Every unique packet with TTL remaining is re-emitted once, TTL decreased
//! by one, to each connected neighbor except the link it arrived on and the
//! original sender. Dedup lives entirely in the router's processed set, so a
//! packet seen twice is neither delivered twice nor relayed twice.

use std::sync::Arc;

use log::{debug, warn};

use super::transport::Transport;
use crate::protocol::{Packet, PacketCodec};
use crate::state::MeshState;

pub struct MeshRelay {
    store: Arc<MeshState>,
    transport: Arc<dyn Transport>,
}

impl MeshRelay {
    pub fn new(store: Arc<MeshState>, transport: Arc<dyn Transport>) -> Self {
        Self { store, transport }
    }

    /// Forward `packet` onward. Best effort per neighbor: a failed link is
    /// logged and the rest still receive the packet. Never re-enters local
    /// routing.
    pub async fn relay(&self, packet: &Packet, origin_link: &str) {
        let Some(forwarded) = packet.decrement_ttl() else {
            return;
        };

        let data = match PacketCodec::encode(&forwarded) {
            Ok(data) => data,
            Err(e) => {
                warn!("Cannot encode packet for relay: {e}");
                return;
            }
        };

        let sender_hex = packet.sender_id_hex();
        let mut forwarded_to = 0usize;

        for peer in self.store.peers().await {
            if peer.peer_id == sender_hex || peer.link_id == origin_link {
                continue;
            }

            match self.transport.send_to(&data, &peer.peer_id).await {
                Ok(()) => forwarded_to += 1,
                Err(e) => debug!("Relay to {} failed: {e}", peer.peer_id),
            }
        }

        if forwarded_to > 0 {
            debug!(
                "Relayed {:?} packet from {} to {} neighbors (ttl {})",
                packet.packet_type, sender_hex, forwarded_to, forwarded.ttl
            );
        }
    }
}
