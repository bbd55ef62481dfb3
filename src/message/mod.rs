//! Chat message model and routing.

pub mod router;
pub mod types;

pub use router::MessageRouter;
pub use types::ChatMessage;
