//! Node orchestrator.
//!
//! Owns every subsystem, wires the transport event pump into the router and
//! exposes the operations a UI drives: send, private send, channel and
//! nickname management. Construction is the only place a failure is fatal;
//! everything after startup is a local recovery.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info};
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};

use crate::config::Config;
use crate::crypto::{IdentityService, NoiseEngine};
use crate::mesh::announce::make_announce_packet;
use crate::mesh::{AnnounceRunner, CleanupRunner, MeshRelay, Transport, TransportEvent};
use crate::message::{ChatMessage, MessageRouter};
use crate::protocol::{
    sender_bytes_from_hex, validate_channel_name, validate_nickname, validate_peer_id, Packet,
    PacketCodec, PacketType,
};
use crate::state::{random_nickname, random_peer_id, MeshState, Peer, PRIVATE_BUCKET};
use crate::ui::UserInterface;

pub struct BitchatManager {
    store: Arc<MeshState>,
    identity: Arc<IdentityService>,
    noise: Arc<NoiseEngine>,
    transport: Arc<dyn Transport>,
    ui: Arc<dyn UserInterface>,
    router: Arc<MessageRouter>,
    announce_runner: AnnounceRunner,
    cleanup_runner: CleanupRunner,
    running: Arc<RwLock<bool>>,
}

impl BitchatManager {
    /// Wire up a node. Fails only when the identity key cannot be loaded or
    /// created; a node without its key cannot participate.
    pub fn new(
        transport: Arc<dyn Transport>,
        ui: Arc<dyn UserInterface>,
        config: Config,
    ) -> Result<Self> {
        let identity = Arc::new(
            IdentityService::load_or_generate(&config.key_path)
                .context("identity key unavailable")?,
        );

        let peer_id = match &config.peer_id {
            Some(peer_id) => {
                validate_peer_id(peer_id).context("configured peer id rejected")?;
                peer_id.to_lowercase()
            }
            None => random_peer_id(),
        };

        let nickname = match &config.nickname {
            Some(nickname) => {
                validate_nickname(nickname).context("configured nickname rejected")?;
                nickname.clone()
            }
            None => random_nickname(),
        };

        info!("Node identity: {} ({})", peer_id, nickname);

        let store = Arc::new(MeshState::with_limits(
            peer_id,
            nickname,
            config.peer_timeout,
            config.max_history,
            config.max_processed,
        ));
        let noise = Arc::new(NoiseEngine::new(config.migration_strategy));
        let relay = Arc::new(MeshRelay::new(store.clone(), transport.clone()));
        let router = Arc::new(MessageRouter::new(
            store.clone(),
            noise.clone(),
            relay,
            transport.clone(),
            ui.clone(),
        ));
        let announce_runner =
            AnnounceRunner::new(store.clone(), transport.clone(), config.announce_interval);
        let cleanup_runner = CleanupRunner::new(
            store.clone(),
            noise.clone(),
            transport.clone(),
            config.cleanup_interval,
        );

        Ok(Self {
            store,
            identity,
            noise,
            transport,
            ui,
            router,
            announce_runner,
            cleanup_runner,
            running: Arc::new(RwLock::new(false)),
        })
    }

    /// Start the transport, the event pump and both background loops, then
    /// announce our identity for handshake discovery.
    pub async fn start(&self) -> Result<()> {
        if *self.running.read().await {
            return Ok(());
        }
        *self.running.write().await = true;

        self.transport
            .init()
            .await
            .context("transport init failed")?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.transport
            .start(events_tx)
            .await
            .context("transport start failed")?;

        self.spawn_event_pump(events_rx);
        self.announce_runner.start().await;
        self.cleanup_runner.start().await;

        if let Err(e) = self.announce_identity().await {
            debug!("Identity announce deferred: {e}");
        }

        info!("Mesh node started");
        Ok(())
    }

    /// Stop loops and transport. Best effort LEAVE first so neighbors evict
    /// us immediately instead of waiting out the staleness window.
    pub async fn stop(&self) {
        if !*self.running.read().await {
            return;
        }

        let sender = self.local_sender_bytes().await;
        let leave = Packet::new(PacketType::Leave, sender, Vec::new());
        if let Err(e) = self.broadcast_packet(&leave).await {
            debug!("Leave broadcast failed: {e}");
        }

        self.announce_runner.stop().await;
        self.cleanup_runner.stop().await;
        *self.running.write().await = false;
        self.transport.stop().await;

        info!("Mesh node stopped");
    }

    fn spawn_event_pump(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        let router = self.router.clone();
        let ui = self.ui.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if !*running.read().await {
                    break;
                }

                match event {
                    TransportEvent::PacketReceived { data, link_id } => {
                        if let Some(packet) = PacketCodec::try_decode(&data, &link_id) {
                            router.process(&packet, &link_id).await;
                        }
                    }
                    TransportEvent::PeerConnected { link_id } => {
                        debug!("Link up: {link_id}");
                        ui.on_peer_connected(&link_id);
                    }
                    TransportEvent::PeerDisconnected { link_id } => {
                        debug!("Link down: {link_id}");
                        ui.on_peer_disconnected(&link_id);
                    }
                }
            }

            debug!("Transport event pump ended");
        });
    }

    // Outbound operations

    /// Broadcast a message into the current channel (or the default room).
    pub async fn send_message(&self, content: &str) -> Result<()> {
        let channel = self.store.current_channel().await;
        let nickname = self.store.nickname().await;

        let channel_opt = if channel.is_empty() {
            None
        } else {
            Some(channel.clone())
        };
        let message = ChatMessage::new(nickname, content.to_string(), channel_opt);

        let packet = self.build_message_packet(&message).await;
        self.broadcast_packet(&packet).await?;

        self.store.add_message_to_history(message, &channel).await;
        debug!(
            "Sent message to {}",
            if channel.is_empty() { "default room" } else { channel.as_str() }
        );
        Ok(())
    }

    /// Send a private message. Uses the peer's Noise session when one is
    /// established, plaintext otherwise.
    pub async fn send_private_message(
        &self,
        content: &str,
        recipient_nickname: &str,
    ) -> Result<()> {
        if let Err(e) = validate_nickname(recipient_nickname) {
            self.ui.on_status(&format!("Cannot send private message: {e}"));
            return Err(e.into());
        }

        let nickname = self.store.nickname().await;
        let message = ChatMessage::new_private(
            nickname,
            content.to_string(),
            recipient_nickname.to_string(),
        );

        let recipient = self.store.peer_by_nickname(recipient_nickname).await;
        let sender = self.local_sender_bytes().await;

        let packet = match recipient {
            Some(peer) if self.noise.has_established_session(&peer.peer_id) => {
                let ciphertext = self
                    .noise
                    .encrypt(&message.to_payload(), &peer.peer_id)
                    .context("session encryption failed")?;

                let signature = self.identity.sign(&ciphertext);
                Packet::new(PacketType::NoiseEncrypted, sender, ciphertext)
                    .with_recipient(sender_bytes_from_hex(&peer.peer_id))
                    .with_signature(signature)
            }
            _ => {
                debug!(
                    "No established session with {:?}; sending private message in the clear",
                    recipient_nickname
                );
                self.build_message_packet(&message).await
            }
        };

        self.broadcast_packet(&packet).await?;
        self.store
            .add_message_to_history(message, PRIVATE_BUCKET)
            .await;
        Ok(())
    }

    /// Join a channel, announcing the change. Names without the leading `#`
    /// are normalized first.
    pub async fn join_channel(&self, channel: &str) -> Result<()> {
        let normalized = if channel.starts_with('#') {
            channel.to_string()
        } else {
            format!("#{channel}")
        };

        if let Err(e) = validate_channel_name(&normalized) {
            self.ui.on_status(&format!("Cannot join channel: {e}"));
            return Err(e.into());
        }

        let current = self.store.current_channel().await;
        if current == normalized {
            return Ok(());
        }
        if !current.is_empty() {
            self.leave_channel().await?;
        }

        self.store.set_current_channel(normalized.clone()).await;

        let sender = self.local_sender_bytes().await;
        let payload = PacketCodec::make_channel_announce_payload(&normalized, true);
        let packet = Packet::new(PacketType::ChannelAnnounce, sender, payload);
        if let Err(e) = self.broadcast_packet(&packet).await {
            debug!("Channel announce failed: {e}");
        }

        info!("Joined channel {}", normalized);
        self.ui.on_channel_joined(&normalized);
        Ok(())
    }

    /// Leave the current channel and fall back to the default room.
    pub async fn leave_channel(&self) -> Result<()> {
        let current = self.store.current_channel().await;
        if current.is_empty() {
            return Ok(());
        }

        self.store.set_current_channel(String::new()).await;

        let sender = self.local_sender_bytes().await;
        let payload = PacketCodec::make_channel_announce_payload("", false);
        let packet = Packet::new(PacketType::ChannelAnnounce, sender, payload);
        if let Err(e) = self.broadcast_packet(&packet).await {
            debug!("Channel leave announce failed: {e}");
        }

        info!("Left channel {}", current);
        self.ui.on_channel_left(&current);
        Ok(())
    }

    pub async fn set_nickname(&self, nickname: &str) -> Result<()> {
        if let Err(e) = validate_nickname(nickname) {
            self.ui.on_status(&format!("Cannot change nickname: {e}"));
            return Err(e.into());
        }

        self.store.set_nickname(nickname.to_string()).await;
        info!("Nickname changed to {}", nickname);
        Ok(())
    }

    /// Broadcast our peer id so peers can resolve handshake roles and the
    /// smaller id initiates.
    pub async fn announce_identity(&self) -> Result<()> {
        if !self.transport.is_ready() {
            return Ok(());
        }

        let peer_id = self.store.peer_id().await;
        let sender = self.local_sender_bytes().await;
        let payload = PacketCodec::make_identity_announce_payload(&peer_id);
        let packet = Packet::new(PacketType::NoiseIdentityAnnounce, sender, payload);

        self.broadcast_packet(&packet).await?;
        debug!("Announced identity {}", peer_id);
        Ok(())
    }

    /// Broadcast a presence announce immediately, outside the loop cadence.
    pub async fn send_announce(&self) -> Result<()> {
        if !self.transport.is_ready() {
            return Ok(());
        }

        let packet = make_announce_packet(&self.store).await;
        self.broadcast_packet(&packet).await
    }

    /// Open a replacement handshake for one established session. The old
    /// keys keep serving until the new session completes; the cleanup loop
    /// triggers this automatically for sessions past their budget.
    pub async fn rekey_session(&self, peer_id: &str) -> Result<()> {
        let message = self
            .noise
            .initiate_rekey(peer_id)
            .context("rekey not started")?;

        let sender = self.local_sender_bytes().await;
        let packet = Packet::new(PacketType::NoiseHandshakeInit, sender, message);
        self.broadcast_packet(&packet).await
    }

    // Accessors

    pub async fn peer_id(&self) -> String {
        self.store.peer_id().await
    }

    pub async fn nickname(&self) -> String {
        self.store.nickname().await
    }

    pub async fn current_channel(&self) -> String {
        self.store.current_channel().await
    }

    pub async fn peers(&self) -> Vec<Peer> {
        self.store.peers().await
    }

    pub async fn history(&self, bucket: &str) -> Vec<ChatMessage> {
        self.store.history(bucket).await
    }

    pub fn fingerprint(&self) -> String {
        self.identity.fingerprint()
    }

    pub fn store(&self) -> &Arc<MeshState> {
        &self.store
    }

    pub fn noise(&self) -> &Arc<NoiseEngine> {
        &self.noise
    }

    pub async fn statistics(&self) -> Value {
        json!({
            "store": self.store.statistics().await,
            "noise": self.noise.statistics(),
            "transport": {
                "ready": self.transport.is_ready(),
                "connected": self.transport.connected_count(),
            },
        })
    }

    // Helpers

    async fn local_sender_bytes(&self) -> [u8; 8] {
        sender_bytes_from_hex(&self.store.peer_id().await)
    }

    async fn build_message_packet(&self, message: &ChatMessage) -> Packet {
        let payload = message.to_payload();
        let signature = self.identity.sign(&payload);
        let sender = self.local_sender_bytes().await;

        Packet::new(PacketType::Message, sender, payload)
            .with_broadcast_recipient()
            .with_signature(signature)
    }

    async fn broadcast_packet(&self, packet: &Packet) -> Result<()> {
        let data = PacketCodec::encode(packet).context("packet encoding failed")?;
        self.transport
            .send(&data)
            .await
            .context("transport send failed")?;
        Ok(())
    }
}
