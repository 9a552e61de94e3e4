pub mod memory;
pub mod ws;

use std::sync::Arc;

use serde_json::Value;

pub use crate::error::TransportError;
pub use memory::MemoryHub;
pub use ws::WsTransport;

// The broadcast primitive is injected behind these seams so the session
// core runs unchanged over an in-process hub or a WebSocket relay.

/// Outbound half of a channel subscription. Publish is non-blocking and
/// best-effort: there is no acknowledgment, no retry, and no timeout. A
/// frame lost by the transport is simply never observed by peers.
pub trait Transport: Send + Sync {
    fn publish(&self, frame: Value) -> Result<(), TransportError>;

    /// Release the subscription. Idempotent.
    fn close(&self);
}

/// Inbound half: the transport delivers every peer frame here. The sending
/// subscriber never receives its own frame back.
pub trait Subscriber: Send + Sync {
    fn on_frame(&self, frame: Value);

    /// A frame arrived but could not be decoded at the transport level.
    fn on_frame_error(&self, detail: &str);
}

/// Factory joining a named channel on some broadcast medium.
pub trait Connector {
    fn join(
        &self,
        channel: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<Box<dyn Transport>, TransportError>;
}
