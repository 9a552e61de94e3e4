use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use super::{Connector, Subscriber, Transport, TransportError};

/// In-process broadcast hub: named channels with multi-subscriber fan-out
/// and no self-delivery. Delivery is synchronous in the publisher's thread,
/// so per-sender order is preserved and tests need no pacing.
///
/// Cloneable; clones share the same channel table.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    channels: Mutex<HashMap<String, Vec<Peer>>>,
    next_id: AtomicU64,
}

struct Peer {
    id: u64,
    subscriber: Arc<dyn Subscriber>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on a channel.
    pub fn peer_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .lock()
            .get(channel)
            .map_or(0, Vec::len)
    }
}

impl Connector for MemoryHub {
    fn join(
        &self,
        channel: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .channels
            .lock()
            .entry(channel.to_string())
            .or_default()
            .push(Peer { id, subscriber });

        Ok(Box::new(MemoryTransport {
            hub: self.inner.clone(),
            channel: channel.to_string(),
            id,
            open: AtomicBool::new(true),
        }))
    }
}

struct MemoryTransport {
    hub: Arc<HubInner>,
    channel: String,
    id: u64,
    open: AtomicBool,
}

impl Transport for MemoryTransport {
    fn publish(&self, frame: Value) -> Result<(), TransportError> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        // Snapshot the peer list before delivering so a subscriber that
        // joins or closes mid-pass cannot affect this pass or deadlock
        // against the registry lock.
        let peers: Vec<Arc<dyn Subscriber>> = {
            let channels = self.hub.channels.lock();
            match channels.get(&self.channel) {
                Some(list) => list
                    .iter()
                    .filter(|p| p.id != self.id)
                    .map(|p| p.subscriber.clone())
                    .collect(),
                None => Vec::new(),
            }
        };

        for peer in peers {
            peer.on_frame(frame.clone());
        }
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let mut channels = self.hub.channels.lock();
            if let Some(list) = channels.get_mut(&self.channel) {
                list.retain(|p| p.id != self.id);
                if list.is_empty() {
                    channels.remove(&self.channel);
                }
            }
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.close();
    }
}
