//! UI callback surface.
//!
//! The core never renders anything; a UI registers this sink at construction
//! and receives the seven event kinds. Defaults are no-ops so implementors
//! only override what they display.

use crate::message::ChatMessage;

pub trait UserInterface: Send + Sync {
    fn on_message_received(&self, _message: &ChatMessage) {}

    fn on_peer_joined(&self, _peer_id: &str, _nickname: &str) {}

    fn on_peer_left(&self, _peer_id: &str, _nickname: &str) {}

    fn on_peer_connected(&self, _link_id: &str) {}

    fn on_peer_disconnected(&self, _link_id: &str) {}

    fn on_channel_joined(&self, _channel: &str) {}

    fn on_channel_left(&self, _channel: &str) {}

    /// Descriptive status text, including validation failures on user input.
    fn on_status(&self, _status: &str) {}
}

/// Sink that swallows every event; headless nodes and tests.
pub struct NullInterface;

impl UserInterface for NullInterface {}
