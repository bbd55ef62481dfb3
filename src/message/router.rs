//! Message router.
//!
//! Single entry point for every decoded packet. Filters duplicates through
//! the shared processed set, dispatches by type, and hands every live packet
//! to the flood relay regardless of what the dispatch did with it locally.

use std::sync::Arc;

use log::{debug, info, warn};

use super::types::ChatMessage;
use crate::constants::PROTOCOL_VERSION;
use crate::crypto::{NoiseEngine, NoiseError};
use crate::mesh::{MeshRelay, Transport};
use crate::protocol::{sender_bytes_from_hex, Packet, PacketCodec, PacketType};
use crate::state::{MeshState, Peer, PRIVATE_BUCKET};
use crate::ui::UserInterface;

pub struct MessageRouter {
    store: Arc<MeshState>,
    noise: Arc<NoiseEngine>,
    relay: Arc<MeshRelay>,
    transport: Arc<dyn Transport>,
    ui: Arc<dyn UserInterface>,
}

impl MessageRouter {
    pub fn new(
        store: Arc<MeshState>,
        noise: Arc<NoiseEngine>,
        relay: Arc<MeshRelay>,
        transport: Arc<dyn Transport>,
        ui: Arc<dyn UserInterface>,
    ) -> Self {
        Self {
            store,
            noise,
            relay,
            transport,
            ui,
        }
    }

    /// Route one inbound packet. `link_id` names the link it arrived on.
    pub async fn process(&self, packet: &Packet, link_id: &str) {
        if packet.version != PROTOCOL_VERSION {
            warn!("Dropping packet with unsupported version {}", packet.version);
            return;
        }

        // At-most-once per node: first sight wins, duplicates stop here.
        if !self.store.mark_processed(&packet.dedup_key()).await {
            debug!("Duplicate packet {}; dropping", packet.dedup_key());
            return;
        }

        match packet.packet_type {
            PacketType::Announce => self.handle_announce(packet, link_id).await,
            PacketType::ChannelAnnounce => self.handle_channel_announce(packet).await,
            PacketType::Leave => self.handle_leave(packet).await,
            PacketType::Message => self.handle_message(packet).await,
            PacketType::NoiseIdentityAnnounce => self.handle_identity_announce(packet).await,
            PacketType::NoiseHandshakeInit => self.handle_handshake_init(packet).await,
            PacketType::NoiseHandshakeResp => self.handle_handshake_resp(packet).await,
            PacketType::NoiseEncrypted => self.handle_noise_encrypted(packet).await,
            other => {
                // Accepted and relayed, never surfaced to the UI.
                debug!(
                    "No handler for {:?} packet from {}; relaying only",
                    other,
                    packet.sender_id_hex()
                );
            }
        }

        if packet.ttl > 0 {
            self.relay.relay(packet, link_id).await;
        }
    }

    async fn handle_announce(&self, packet: &Packet, link_id: &str) {
        let nickname = PacketCodec::parse_announce_payload(&packet.payload);
        let peer_id = packet.sender_id_hex();

        if peer_id == self.store.peer_id().await {
            return;
        }

        match self.store.peer_info(&peer_id).await {
            Some(mut peer) => {
                peer.nickname = nickname;
                peer.link_id = link_id.to_string();
                peer.update_last_seen();
                self.store.upsert_peer(peer).await;
                debug!("Refreshed peer {}", peer_id);
            }
            None => {
                let mut peer = Peer::new(peer_id.clone(), nickname.clone());
                peer.link_id = link_id.to_string();
                peer.has_announced = true;
                self.store.upsert_peer(peer).await;

                info!("Discovered peer {} ({})", peer_id, nickname);
                self.ui.on_peer_joined(&peer_id, &nickname);
            }
        }
    }

    async fn handle_channel_announce(&self, packet: &Packet) {
        let (channel, joining) =
            match PacketCodec::parse_channel_announce_payload(&packet.payload) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!("Bad channel announce payload: {e}");
                    return;
                }
            };

        let peer_id = packet.sender_id_hex();
        if let Some(mut peer) = self.store.peer_info(&peer_id).await {
            peer.channel = if joining { channel.clone() } else { String::new() };
            self.store.upsert_peer(peer).await;
        }

        debug!(
            "Peer {} {} channel {:?}",
            peer_id,
            if joining { "joined" } else { "left" },
            channel
        );
    }

    async fn handle_leave(&self, packet: &Packet) {
        let peer_id = packet.sender_id_hex();

        // A departed peer's session is useless; drop it with the peer row.
        self.noise.remove_session(&peer_id);

        if let Some(peer) = self.store.remove_peer(&peer_id).await {
            info!("Peer {} left", peer_id);
            self.ui.on_peer_left(&peer_id, &peer.nickname);
        }
    }

    async fn handle_message(&self, packet: &Packet) {
        let message = match ChatMessage::from_payload(&packet.payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Bad message payload from {}: {e}", packet.sender_id_hex());
                return;
            }
        };

        // Echo suppression: the flood brings our own packets back.
        let sender_id = packet.sender_id_hex();
        if sender_id == self.store.peer_id().await {
            debug!("Ignoring our own message echo");
            return;
        }

        let current_channel = self.store.current_channel().await;
        let nickname = self.store.nickname().await;
        let message_channel = message.channel.clone().unwrap_or_default();

        let addressed_to_us = message.is_private
            && message.recipient_nickname.as_deref() == Some(nickname.as_str());
        let for_current_room = message_channel == current_channel;

        if !for_current_room && !addressed_to_us {
            debug!(
                "Message from {} not for us (channel {:?}, current {:?}); relay only",
                message.sender, message.channel, current_channel
            );
            return;
        }

        let bucket = if message_channel.is_empty() && message.is_private {
            PRIVATE_BUCKET.to_string()
        } else {
            message_channel
        };

        self.store
            .add_message_to_history(message.clone(), &bucket)
            .await;
        self.ui.on_message_received(&message);
    }

    async fn handle_identity_announce(&self, packet: &Packet) {
        let peer_id = packet.sender_id_hex();
        let local_peer_id = self.store.peer_id().await;

        if peer_id == local_peer_id {
            return;
        }

        // Deterministic tiebreak: the smaller id initiates.
        if local_peer_id < peer_id {
            match self.noise.initiate_handshake(&peer_id) {
                Ok(message) => {
                    info!("Initiating Noise handshake with {}", peer_id);
                    self.send_noise_packet(PacketType::NoiseHandshakeInit, message)
                        .await;
                }
                Err(NoiseError::InvalidState(reason)) => {
                    debug!("Not initiating handshake with {}: {}", peer_id, reason);
                }
                Err(e) => warn!("Cannot initiate handshake with {}: {e}", peer_id),
            }
        } else {
            debug!("Waiting for {} to initiate (their id is smaller)", peer_id);
        }
    }

    async fn handle_handshake_init(&self, packet: &Packet) {
        let peer_id = packet.sender_id_hex();
        let local_peer_id = self.store.peer_id().await;

        if peer_id == local_peer_id {
            return;
        }

        // The engine tells fresh handshakes, rekeys of an established
        // session and stale duplicates apart.
        match self
            .noise
            .process_handshake_init(&peer_id, &packet.payload, &local_peer_id)
        {
            Ok(Some(reply)) => {
                self.send_noise_packet(PacketType::NoiseHandshakeResp, reply)
                    .await;
            }
            Ok(None) => {}
            Err(NoiseError::InvalidState(reason)) => {
                debug!("Dropping handshake init from {}: {}", peer_id, reason);
            }
            Err(e) => warn!("Handshake init from {} failed: {e}", peer_id),
        }
    }

    async fn handle_handshake_resp(&self, packet: &Packet) {
        let peer_id = packet.sender_id_hex();

        if peer_id == self.store.peer_id().await {
            return;
        }

        match self.noise.process_handshake_message(&peer_id, &packet.payload) {
            Ok(Some(reply)) => {
                // Mid-handshake: our next message continues the exchange.
                self.send_noise_packet(PacketType::NoiseHandshakeResp, reply)
                    .await;
            }
            Ok(None) => {
                info!("Noise session with {} ready", peer_id);
            }
            Err(NoiseError::InvalidState(reason)) => {
                debug!("Dropping handshake response from {}: {}", peer_id, reason);
            }
            Err(e) => warn!("Handshake response from {} failed: {e}", peer_id),
        }
    }

    async fn handle_noise_encrypted(&self, packet: &Packet) {
        let peer_id = packet.sender_id_hex();

        if peer_id == self.store.peer_id().await {
            return;
        }

        match self.noise.decrypt(&packet.payload, &peer_id) {
            Ok(plaintext) => {
                // Re-enter as a plaintext MESSAGE so normal handling applies.
                let mut synthetic = packet.clone();
                synthetic.packet_type = PacketType::Message;
                synthetic.payload = plaintext;
                synthetic.flags.is_compressed = false;

                self.handle_message(&synthetic).await;
            }
            Err(e) => warn!("Cannot decrypt packet from {}: {e}", peer_id),
        }
    }

    async fn send_noise_packet(&self, packet_type: PacketType, payload: Vec<u8>) {
        let sender = sender_bytes_from_hex(&self.store.peer_id().await);
        let packet = Packet::new(packet_type, sender, payload);

        match PacketCodec::encode(&packet) {
            Ok(data) => {
                if let Err(e) = self.transport.send(&data).await {
                    warn!("Cannot send {:?} packet: {e}", packet_type);
                }
            }
            Err(e) => warn!("Cannot encode {:?} packet: {e}", packet_type),
        }
    }
}
