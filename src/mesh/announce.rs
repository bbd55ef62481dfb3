//! Presence announce loop.
//!
//! Broadcasts an ANNOUNCE carrying the current nickname every 15 seconds so
//! neighbors learn and refresh this peer. A transport that is not ready yet
//! is simply skipped until the next wake.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::RwLock;
use tokio::time;

use super::transport::Transport;
use crate::protocol::{sender_bytes_from_hex, Packet, PacketCodec, PacketType};
use crate::state::MeshState;

/// Build the ANNOUNCE packet for the store's current identity. Announces use
/// the full mesh TTL so presence reaches the whole flood radius.
pub async fn make_announce_packet(store: &MeshState) -> Packet {
    let nickname = store.nickname().await;
    let sender = sender_bytes_from_hex(&store.peer_id().await);

    Packet::new(
        PacketType::Announce,
        sender,
        PacketCodec::make_announce_payload(&nickname),
    )
}

pub struct AnnounceRunner {
    store: Arc<MeshState>,
    transport: Arc<dyn Transport>,
    interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl AnnounceRunner {
    pub fn new(store: Arc<MeshState>, transport: Arc<dyn Transport>, interval: Duration) -> Self {
        Self {
            store,
            transport,
            interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Spawn the loop; the first announce fires immediately.
    pub async fn start(&self) {
        if *self.running.read().await {
            return;
        }
        *self.running.write().await = true;

        let store = self.store.clone();
        let transport = self.transport.clone();
        let cadence = self.interval;
        let running = self.running.clone();

        tokio::spawn(async move {
            let mut interval = time::interval(cadence);
            info!("Announce loop started");

            while *running.read().await {
                interval.tick().await;

                if !*running.read().await {
                    break;
                }

                if !transport.is_ready() {
                    debug!("Transport not ready; skipping announce");
                    continue;
                }

                let packet = make_announce_packet(&store).await;
                match PacketCodec::encode(&packet) {
                    Ok(data) => {
                        if let Err(e) = transport.send(&data).await {
                            debug!("Announce send failed: {e}");
                        }
                    }
                    Err(e) => error!("Cannot encode announce packet: {e}"),
                }
            }

            info!("Announce loop stopped");
        });
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }
}
