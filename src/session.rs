use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::error::RelayError;
use crate::message::{ChannelEvent, Message};
use crate::transport::{Connector, Subscriber, Transport, WsTransport};

/// Result of a mutating session operation. `NotJoined` is the documented
/// sentinel for calls on a closed session; lifecycle misuse degrades
/// silently instead of erroring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Sent,
    NotJoined,
}

/// Handle returned by [`Session::add_listener`]. Listener identity for
/// removal. Registering the same closure twice yields two ids and two
/// invocations per event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Session behavior toggles.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConfig {
    /// When set, every applied `SET_VALUE` (local echo or remote) also
    /// notifies listeners with a synthesized `set_value` event carrying
    /// `{key, value}`. Off by default: key-value sync is silent and
    /// events are the only listener-notified traffic.
    pub notify_on_set: bool,
}

/// One membership of one named channel.
///
/// Owns the transport subscription, the locally replicated key-value store
/// (last applied write wins per key) and the listener registry. Local
/// writes and events are applied to local state before they are published,
/// so a session always observes its own operations immediately even though
/// the transport never delivers a sender's frames back to it.
///
/// Closing is terminal: the transport handle is released and mutating
/// operations return [`DeliveryStatus::NotJoined`] from then on, while
/// reads keep serving the cached replica. Rejoining requires a new
/// session. Dropping the session closes it.
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    channel_name: String,
    config: SessionConfig,
    store: DashMap<String, Value>,
    last_event: RwLock<Option<ChannelEvent>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
    transport: Mutex<Option<Arc<dyn Transport>>>,
}

impl Session {
    /// Join `channel` via `connector`. Subscription is established
    /// synchronously; a connector failure is fatal to construction.
    pub fn join(connector: &impl Connector, channel: &str) -> Result<Self, RelayError> {
        Self::join_with(connector, channel, SessionConfig::default())
    }

    pub fn join_with(
        connector: &impl Connector,
        channel: &str,
        config: SessionConfig,
    ) -> Result<Self, RelayError> {
        let inner = Arc::new(SessionInner::new(channel, config));
        let subscriber: Arc<dyn Subscriber> = inner.clone();
        let transport = connector.join(channel, subscriber)?;
        *inner.transport.lock() = Some(Arc::from(transport));
        Ok(Self { inner })
    }

    /// Join `channel` through a WebSocket relay server.
    pub async fn join_relay(relay_url: &str, channel: &str) -> Result<Self, RelayError> {
        Self::join_relay_with(relay_url, channel, SessionConfig::default()).await
    }

    pub async fn join_relay_with(
        relay_url: &str,
        channel: &str,
        config: SessionConfig,
    ) -> Result<Self, RelayError> {
        let inner = Arc::new(SessionInner::new(channel, config));
        let transport = WsTransport::connect(relay_url, channel, inner.clone()).await?;
        *inner.transport.lock() = Some(Arc::new(transport));
        Ok(Self { inner })
    }

    pub fn channel_name(&self) -> &str {
        &self.inner.channel_name
    }

    pub fn is_active(&self) -> bool {
        self.inner.transport.lock().is_some()
    }

    /// Declare the current value of `key`: applied to the local store
    /// first, then published to peers. Side-effect-complete with respect
    /// to local state when it returns; delivery to peers is best-effort.
    pub fn set_value(&self, key: impl Into<String>, value: Value) -> DeliveryStatus {
        self.inner
            .echo_and_publish(Message::set_value(key, value))
    }

    /// Pure read of the local replica. May be stale relative to writes in
    /// flight from peers; stays readable after close.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.inner.store.get(key).map(|v| v.clone())
    }

    /// Raise an event: the sender's own listeners fire exactly as if the
    /// event had been received, then the event is published to peers.
    pub fn broadcast_event(&self, event_type: &str, data: Value) -> DeliveryStatus {
        self.inner
            .echo_and_publish(Message::event(event_type, data))
    }

    /// Most recently observed event, local or remote. Not historized.
    pub fn last_event(&self) -> Option<ChannelEvent> {
        self.inner.last_event.read().clone()
    }

    /// Register a listener invoked for every event in registration order.
    pub fn add_listener(&self, listener: impl Fn(&ChannelEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Unknown ids are a no-op. Removal during a
    /// dispatch pass does not affect that pass.
    pub fn remove_listener(&self, id: ListenerId) {
        self.inner.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    /// Release the transport subscription. Idempotent; the session is
    /// terminal afterwards.
    pub fn close(&self) {
        let taken = self.inner.transport.lock().take();
        if let Some(transport) = taken {
            transport.close();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl SessionInner {
    fn new(channel: &str, config: SessionConfig) -> Self {
        Self {
            channel_name: channel.to_string(),
            config,
            store: DashMap::new(),
            last_event: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
            transport: Mutex::new(None),
        }
    }

    /// Local echo then publish. The transport lock is never held across
    /// apply or publish, so listeners may close or mutate the session
    /// re-entrantly.
    fn echo_and_publish(&self, message: Message) -> DeliveryStatus {
        let transport = match self.transport.lock().clone() {
            Some(transport) => transport,
            None => return DeliveryStatus::NotJoined,
        };

        self.apply(&message);

        if let Err(err) = transport.publish(message.encode()) {
            // Fire-and-forget: a lost frame is silent from the sender's
            // perspective.
            debug!(
                channel = %self.channel_name,
                %err,
                "publish failed, frame dropped"
            );
        }
        DeliveryStatus::Sent
    }

    /// Merge one message into local state. Shared by the local-echo path
    /// and transport reception.
    fn apply(&self, message: &Message) {
        match message {
            Message::SetValue { key, value } => {
                // Last delivered write wins, no origin or version check.
                self.store.insert(key.clone(), value.clone());
                if self.config.notify_on_set {
                    let event = ChannelEvent::new(
                        "set_value",
                        json!({"key": key, "value": value}),
                    );
                    self.dispatch(&event);
                }
            }
            Message::Event { data } => {
                *self.last_event.write() = Some(data.clone());
                self.dispatch(data);
            }
        }
    }

    /// Invoke listeners in registration order on a snapshot of the
    /// registry. Each invocation is isolated; a panicking listener is
    /// reported and the rest still run.
    fn dispatch(&self, event: &ChannelEvent) {
        let snapshot: Vec<(ListenerId, Listener)> = self.listeners.lock().clone();
        for (id, listener) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(
                    kind = "handler_fault",
                    channel = %self.channel_name,
                    listener = id.0,
                    event_type = %event.event_type,
                    "listener panicked during dispatch"
                );
            }
        }
    }
}

impl Subscriber for SessionInner {
    fn on_frame(&self, frame: Value) {
        match Message::decode(frame) {
            Ok(message) => self.apply(&message),
            Err(err) => {
                warn!(
                    kind = "malformed_message",
                    channel = %self.channel_name,
                    %err,
                    "dropping frame"
                );
            }
        }
    }

    fn on_frame_error(&self, detail: &str) {
        warn!(
            kind = "frame_error",
            channel = %self.channel_name,
            detail,
            "transport could not decode frame"
        );
    }
}
