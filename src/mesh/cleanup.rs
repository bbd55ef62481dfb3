//! Periodic housekeeping loop.
//!
//! Each pass: evict peers past the staleness window, abandon Noise
//! handshakes that made no progress, and open replacement handshakes for
//! sessions past their rekey budget. History and dedup trims happen lazily
//! on insert; this loop is only their fallback hook.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::RwLock;
use tokio::time;

use super::transport::Transport;
use crate::crypto::NoiseEngine;
use crate::protocol::{sender_bytes_from_hex, Packet, PacketCodec, PacketType};
use crate::state::MeshState;

/// Open replacement handshakes for every session past its rekey budget.
/// Each old session keeps serving until its replacement completes.
pub async fn rekey_stale_sessions(
    store: &MeshState,
    noise: &NoiseEngine,
    transport: &dyn Transport,
) {
    for peer_id in noise.sessions_needing_rekey() {
        let message = match noise.initiate_rekey(&peer_id) {
            Ok(message) => message,
            Err(e) => {
                debug!("Rekey with {} not started: {e}", peer_id);
                continue;
            }
        };

        let sender = sender_bytes_from_hex(&store.peer_id().await);
        let packet = Packet::new(PacketType::NoiseHandshakeInit, sender, message);

        match PacketCodec::encode(&packet) {
            Ok(data) => {
                if let Err(e) = transport.send(&data).await {
                    warn!("Rekey handshake send to {} failed: {e}", peer_id);
                }
            }
            Err(e) => warn!("Cannot encode rekey handshake for {}: {e}", peer_id),
        }
    }
}

pub struct CleanupRunner {
    store: Arc<MeshState>,
    noise: Arc<NoiseEngine>,
    transport: Arc<dyn Transport>,
    interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl CleanupRunner {
    pub fn new(
        store: Arc<MeshState>,
        noise: Arc<NoiseEngine>,
        transport: Arc<dyn Transport>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            noise,
            transport,
            interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    pub async fn start(&self) {
        if *self.running.read().await {
            return;
        }
        *self.running.write().await = true;

        let store = self.store.clone();
        let noise = self.noise.clone();
        let transport = self.transport.clone();
        let cadence = self.interval;
        let running = self.running.clone();

        tokio::spawn(async move {
            let mut interval = time::interval(cadence);
            info!("Cleanup loop started");

            while *running.read().await {
                interval.tick().await;

                if !*running.read().await {
                    break;
                }

                let evicted = store.cleanup_stale_peers().await;
                for peer in &evicted {
                    debug!("Evicted stale peer {} ({})", peer.peer_id, peer.display_name());
                }

                noise.cleanup_stale_handshakes();
                rekey_stale_sessions(&store, &noise, transport.as_ref()).await;
            }

            info!("Cleanup loop stopped");
        });
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }
}
