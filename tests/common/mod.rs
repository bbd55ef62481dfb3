//! Shared test doubles: an in-memory hub transport with a configurable
//! topology and a UI sink that records every callback.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::{sleep, Duration};

use bitchat_core::mesh::{
    Transport, TransportError, TransportEvent, TransportEventSender,
};
use bitchat_core::{BitchatManager, ChatMessage, Config, MigrationStrategy, UserInterface};

/// A captured frame: (from, to, wire bytes).
pub type Frame = (String, String, Vec<u8>);

#[derive(Default)]
struct HubInner {
    nodes: HashMap<String, TransportEventSender>,
    links: HashSet<(String, String)>,
    frames: Vec<Frame>,
}

/// Central switchboard connecting `MemoryTransport` instances along an
/// explicit topology. Delivery is synchronous and exactly one frame per
/// event, per the adapter framing contract.
#[derive(Default)]
pub struct MeshHub {
    inner: Mutex<HubInner>,
}

fn link_key(a: &str, b: &str) -> (String, String) {
    if a < b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl MeshHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport(self: &Arc<Self>, peer_id: &str) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            peer_id: peer_id.to_string(),
            hub: self.clone(),
            ready: AtomicBool::new(false),
        })
    }

    /// Connect two nodes. Fires link-up events at both ends if they are
    /// running.
    pub fn link(&self, a: &str, b: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.links.insert(link_key(a, b));

        if let Some(events) = inner.nodes.get(a) {
            let _ = events.send(TransportEvent::PeerConnected {
                link_id: format!("link-{b}"),
            });
        }
        if let Some(events) = inner.nodes.get(b) {
            let _ = events.send(TransportEvent::PeerConnected {
                link_id: format!("link-{a}"),
            });
        }
    }

    /// Tear a link down, firing link-down events.
    pub fn unlink(&self, a: &str, b: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.links.remove(&link_key(a, b));

        if let Some(events) = inner.nodes.get(a) {
            let _ = events.send(TransportEvent::PeerDisconnected {
                link_id: format!("link-{b}"),
            });
        }
        if let Some(events) = inner.nodes.get(b) {
            let _ = events.send(TransportEvent::PeerDisconnected {
                link_id: format!("link-{a}"),
            });
        }
    }

    /// Every frame that crossed the hub so far.
    pub fn frames(&self) -> Vec<Frame> {
        self.inner.lock().unwrap().frames.clone()
    }

    fn register(&self, peer_id: &str, events: TransportEventSender) {
        self.inner
            .lock()
            .unwrap()
            .nodes
            .insert(peer_id.to_string(), events);
    }

    fn unregister(&self, peer_id: &str) {
        self.inner.lock().unwrap().nodes.remove(peer_id);
    }

    fn neighbors(&self, of: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .keys()
            .filter(|other| {
                *other != of && inner.links.contains(&link_key(of, other))
            })
            .cloned()
            .collect()
    }

    fn deliver(&self, from: &str, to: &str, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();

        if !inner.links.contains(&link_key(from, to)) {
            return Err(TransportError::SendFailed(to.to_string()));
        }

        let Some(events) = inner.nodes.get(to) else {
            return Err(TransportError::SendFailed(to.to_string()));
        };

        events
            .send(TransportEvent::PacketReceived {
                data: data.to_vec(),
                link_id: format!("link-{from}"),
            })
            .map_err(|_| TransportError::LinkDropped(to.to_string()))?;

        inner
            .frames
            .push((from.to_string(), to.to_string(), data.to_vec()));
        Ok(())
    }
}

/// Transport double backed by the hub. One instance per node.
pub struct MemoryTransport {
    peer_id: String,
    hub: Arc<MeshHub>,
    ready: AtomicBool,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn init(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn start(&self, events: TransportEventSender) -> Result<(), TransportError> {
        self.hub.register(&self.peer_id, events);
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.ready.store(false, Ordering::SeqCst);
        self.hub.unregister(&self.peer_id);
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_ready() {
            return Err(TransportError::NotReady);
        }

        for neighbor in self.hub.neighbors(&self.peer_id) {
            // Best effort per neighbor, like a real broadcast.
            let _ = self.hub.deliver(&self.peer_id, &neighbor, data);
        }
        Ok(())
    }

    async fn send_to(&self, data: &[u8], peer_id: &str) -> Result<(), TransportError> {
        if !self.is_ready() {
            return Err(TransportError::NotReady);
        }
        self.hub.deliver(&self.peer_id, peer_id, data)
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn connected_count(&self) -> usize {
        self.hub.neighbors(&self.peer_id).len()
    }
}

/// UI sink recording every callback for assertions.
#[derive(Default)]
pub struct RecordingUi {
    messages: Mutex<Vec<ChatMessage>>,
    joined: Mutex<Vec<(String, String)>>,
    left: Mutex<Vec<(String, String)>>,
    connected: Mutex<Vec<String>>,
    disconnected: Mutex<Vec<String>>,
    channels_joined: Mutex<Vec<String>>,
    channels_left: Mutex<Vec<String>>,
    statuses: Mutex<Vec<String>>,
}

impl RecordingUi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn joined(&self) -> Vec<(String, String)> {
        self.joined.lock().unwrap().clone()
    }

    pub fn left(&self) -> Vec<(String, String)> {
        self.left.lock().unwrap().clone()
    }

    pub fn channels_joined(&self) -> Vec<String> {
        self.channels_joined.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<String> {
        self.statuses.lock().unwrap().clone()
    }
}

impl UserInterface for RecordingUi {
    fn on_message_received(&self, message: &ChatMessage) {
        self.messages.lock().unwrap().push(message.clone());
    }

    fn on_peer_joined(&self, peer_id: &str, nickname: &str) {
        self.joined
            .lock()
            .unwrap()
            .push((peer_id.to_string(), nickname.to_string()));
    }

    fn on_peer_left(&self, peer_id: &str, nickname: &str) {
        self.left
            .lock()
            .unwrap()
            .push((peer_id.to_string(), nickname.to_string()));
    }

    fn on_peer_connected(&self, link_id: &str) {
        self.connected.lock().unwrap().push(link_id.to_string());
    }

    fn on_peer_disconnected(&self, link_id: &str) {
        self.disconnected.lock().unwrap().push(link_id.to_string());
    }

    fn on_channel_joined(&self, channel: &str) {
        self.channels_joined.lock().unwrap().push(channel.to_string());
    }

    fn on_channel_left(&self, channel: &str) {
        self.channels_left.lock().unwrap().push(channel.to_string());
    }

    fn on_status(&self, status: &str) {
        self.statuses.lock().unwrap().push(status.to_string());
    }
}

/// A started node plus its recording UI and the tempdir guarding its key.
pub struct TestNode {
    pub manager: BitchatManager,
    pub ui: Arc<RecordingUi>,
    _keys: tempfile::TempDir,
}

/// Build and start a node with a fixed identity.
pub async fn spawn_node(hub: &Arc<MeshHub>, peer_id: &str, nickname: &str) -> TestNode {
    let keys = tempfile::tempdir().unwrap();
    let ui = RecordingUi::new();

    let config = Config {
        nickname: Some(nickname.to_string()),
        peer_id: Some(peer_id.to_string()),
        key_path: keys.path().join("bitchat-pk.pem"),
        migration_strategy: MigrationStrategy::None,
        ..Config::default()
    };

    let manager = BitchatManager::new(hub.transport(peer_id), ui.clone(), config).unwrap();
    manager.start().await.unwrap();

    TestNode {
        manager,
        ui,
        _keys: keys,
    }
}

/// Let queued events drain.
pub async fn settle() {
    sleep(Duration::from_millis(120)).await;
}
