use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use relay::transport::{Connector, Subscriber, Transport};
use relay::{
    ChannelEvent, DeliveryStatus, ListenerId, MemoryHub, RelayError, Session, SessionConfig,
    TransportError,
};
use serde_json::{json, Value};

/// Transport peer that records nothing; used to inject raw frames into a
/// channel from "outside" a session.
struct Quiet;

impl Subscriber for Quiet {
    fn on_frame(&self, _frame: Value) {}
    fn on_frame_error(&self, _detail: &str) {}
}

/// Broadcast medium that cannot be reached.
struct Unreachable;

impl Connector for Unreachable {
    fn join(
        &self,
        _channel: &str,
        _subscriber: Arc<dyn Subscriber>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        Err(TransportError::Unavailable("no broadcast medium".into()))
    }
}

/// Connector that hands the subscription back to the test so frames and
/// frame errors can be injected straight into the receive path.
#[derive(Default)]
struct Capturing {
    subscriber: Mutex<Option<Arc<dyn Subscriber>>>,
}

struct Inert;

impl Transport for Inert {
    fn publish(&self, _frame: Value) -> Result<(), TransportError> {
        Ok(())
    }
    fn close(&self) {}
}

impl Connector for Capturing {
    fn join(
        &self,
        _channel: &str,
        subscriber: Arc<dyn Subscriber>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        *self.subscriber.lock().unwrap() = Some(subscriber);
        Ok(Box::new(Inert))
    }
}

#[test]
fn local_echo_without_peers() {
    let hub = MemoryHub::new();
    let session = Session::join(&hub, "solo").unwrap();

    assert_eq!(session.set_value("x", json!(1)), DeliveryStatus::Sent);
    assert_eq!(session.get_value("x"), Some(json!(1)));

    session.set_value("x", json!(2));
    assert_eq!(session.get_value("x"), Some(json!(2)));
}

#[test]
fn two_sessions_converge() {
    let hub = MemoryHub::new();
    let a = Session::join(&hub, "room").unwrap();
    let b = Session::join(&hub, "room").unwrap();

    a.set_value("x", json!(1));

    assert_eq!(a.get_value("x"), Some(json!(1)));
    assert_eq!(b.get_value("x"), Some(json!(1)));
}

#[test]
fn last_delivered_write_wins() {
    let hub = MemoryHub::new();
    let a = Session::join(&hub, "room").unwrap();
    let b = Session::join(&hub, "room").unwrap();
    let c = Session::join(&hub, "room").unwrap();

    a.set_value("key", json!("from-a"));
    c.set_value("key", json!("from-c"));

    // B saw A's write, then C's: the last delivered one wins with no
    // origin or version comparison.
    assert_eq!(b.get_value("key"), Some(json!("from-c")));
    // A's local echo is overwritten by C's later delivery too.
    assert_eq!(a.get_value("key"), Some(json!("from-c")));
}

#[test]
fn broadcast_event_fires_own_listeners() {
    let hub = MemoryHub::new();
    let a = Session::join(&hub, "room").unwrap();

    let seen: Arc<Mutex<Vec<ChannelEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    a.add_listener(move |event| sink.lock().unwrap().push(event.clone()));

    // The transport never delivers a sender's own frame back, so this
    // only works through the local echo.
    assert_eq!(
        a.broadcast_event("ping", json!("payload")),
        DeliveryStatus::Sent
    );

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].event_type, "ping");
    assert_eq!(seen[0].data, json!("payload"));
    assert_eq!(a.last_event().unwrap().event_type, "ping");
}

#[test]
fn events_reach_peers_and_update_last_event() {
    let hub = MemoryHub::new();
    let a = Session::join(&hub, "room").unwrap();
    let b = Session::join(&hub, "room").unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    b.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    a.broadcast_event("tick", json!(1));

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(b.last_event().unwrap().event_type, "tick");
}

#[test]
fn listeners_fire_in_registration_order_and_duplicates_fire_twice() {
    let hub = MemoryHub::new();
    let session = Session::join(&hub, "room").unwrap();

    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let o1 = order.clone();
    session.add_listener(move |_| o1.lock().unwrap().push("first"));
    let o2 = order.clone();
    let shared = Arc::new(move |_: &ChannelEvent| {
        o2.lock().unwrap().push("second");
    });
    let twice_a = shared.clone();
    let id_a = session.add_listener(move |e| twice_a(e));
    let twice_b = shared.clone();
    let id_b = session.add_listener(move |e| twice_b(e));

    // Same underlying closure registered twice gets two ids and fires
    // twice per event, by design.
    assert_ne!(id_a, id_b);

    session.broadcast_event("go", Value::Null);
    assert_eq!(
        order.lock().unwrap().as_slice(),
        &["first", "second", "second"]
    );
}

#[test]
fn panicking_listener_does_not_stop_the_rest() {
    let hub = MemoryHub::new();
    let session = Session::join(&hub, "room").unwrap();

    let count = Arc::new(AtomicUsize::new(0));

    session.add_listener(|_| panic!("listener fault"));
    let counter = count.clone();
    session.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    session.broadcast_event("boom", Value::Null);

    // The fault is contained; the second listener still ran and the
    // session stays usable.
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(session.set_value("alive", json!(true)), DeliveryStatus::Sent);
}

#[test]
fn removal_during_dispatch_does_not_affect_the_current_pass() {
    let hub = MemoryHub::new();
    let session = Arc::new(Session::join(&hub, "room").unwrap());

    let hits: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let second_id: Arc<OnceLock<ListenerId>> = Arc::new(OnceLock::new());

    let h1 = hits.clone();
    let slot = second_id.clone();
    let remover = session.clone();
    session.add_listener(move |_| {
        h1.lock().unwrap().push("first");
        if let Some(id) = slot.get() {
            remover.remove_listener(*id);
        }
    });

    let h2 = hits.clone();
    let id = session.add_listener(move |_| h2.lock().unwrap().push("second"));
    second_id.set(id).unwrap();

    // First pass: the dispatch snapshot was taken before the removal, so
    // the second listener still fires.
    session.broadcast_event("one", Value::Null);
    assert_eq!(hits.lock().unwrap().as_slice(), &["first", "second"]);

    // Second pass: the removal has taken effect.
    session.broadcast_event("two", Value::Null);
    assert_eq!(
        hits.lock().unwrap().as_slice(),
        &["first", "second", "first"]
    );
}

#[test]
fn removing_an_unknown_listener_is_a_noop() {
    let hub = MemoryHub::new();
    let a = Session::join(&hub, "room").unwrap();
    let b = Session::join(&hub, "other").unwrap();

    let foreign = b.add_listener(|_| {});
    a.remove_listener(foreign);

    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    a.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    a.broadcast_event("still-works", Value::Null);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn close_is_terminal_and_reads_survive() {
    let hub = MemoryHub::new();
    let a = Session::join(&hub, "room1").unwrap();
    let b = Session::join(&hub, "room1").unwrap();

    a.set_value("score", json!("10"));
    a.broadcast_event("done", json!("x"));
    assert_eq!(b.get_value("score"), Some(json!("10")));

    a.close();
    a.close(); // idempotent
    assert!(!a.is_active());
    assert_eq!(hub.peer_count("room1"), 1);

    // Mutations degrade to the sentinel and never reach the transport.
    assert_eq!(a.set_value("score", json!("11")), DeliveryStatus::NotJoined);
    assert_eq!(
        a.broadcast_event("late", Value::Null),
        DeliveryStatus::NotJoined
    );
    assert_eq!(b.get_value("score"), Some(json!("10")));

    // Reads keep serving the cached replica.
    assert_eq!(a.get_value("score"), Some(json!("10")));
    assert_eq!(a.last_event().unwrap().event_type, "done");

    // A closed peer no longer receives.
    b.set_value("score", json!("20"));
    assert_eq!(a.get_value("score"), Some(json!("10")));
}

#[test]
fn dropping_a_session_releases_its_subscription() {
    let hub = MemoryHub::new();
    {
        let _session = Session::join(&hub, "room").unwrap();
        assert_eq!(hub.peer_count("room"), 1);
    }
    assert_eq!(hub.peer_count("room"), 0);
}

#[test]
fn unknown_message_kind_is_dropped() {
    let hub = MemoryHub::new();
    let session = Session::join(&hub, "room").unwrap();
    let injector = hub.join("room", Arc::new(Quiet)).unwrap();

    session.set_value("k", json!("keep"));
    session.broadcast_event("kept", Value::Null);

    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    session.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    injector
        .publish(json!({"type": "NONSENSE", "key": "k", "value": "evil"}))
        .unwrap();
    injector.publish(json!({"no_type_at_all": true})).unwrap();

    // Dropped without state change, dispatch or panic.
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(session.get_value("k"), Some(json!("keep")));
    assert_eq!(session.last_event().unwrap().event_type, "kept");
    assert_eq!(session.set_value("k", json!("still-up")), DeliveryStatus::Sent);
}

#[test]
fn connector_failure_is_fatal_to_construction() {
    let err = match Session::join(&Unreachable, "room") {
        Ok(_) => panic!("join must fail when the connector is unreachable"),
        Err(err) => err,
    };
    assert!(matches!(
        err,
        RelayError::Transport(TransportError::Unavailable(_))
    ));
}

#[test]
fn frame_errors_are_diagnostic_only() {
    let connector = Capturing::default();
    let session = Session::join(&connector, "room").unwrap();
    let subscriber = connector.subscriber.lock().unwrap().clone().unwrap();

    session.set_value("k", json!(1));

    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    session.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    // Undecodable bytes at the transport level: reported, nothing else.
    subscriber.on_frame_error("invalid utf-8 payload");

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(session.get_value("k"), Some(json!(1)));
    assert_eq!(session.last_event(), None);
    assert!(session.is_active());
    assert_eq!(session.set_value("k", json!(2)), DeliveryStatus::Sent);
}

#[test]
fn notify_on_set_synthesizes_listener_events() {
    let hub = MemoryHub::new();
    let config = SessionConfig { notify_on_set: true };
    let a = Session::join_with(&hub, "room", config).unwrap();
    let b = Session::join_with(&hub, "room", config).unwrap();

    let seen: Arc<Mutex<Vec<ChannelEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    b.add_listener(move |event| sink.lock().unwrap().push(event.clone()));

    a.set_value("score", json!(7));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].event_type, "set_value");
    assert_eq!(seen[0].data, json!({"key": "score", "value": 7}));
    // Synthesized notifications are not events: last_event stays empty.
    assert_eq!(b.last_event(), None);
}

#[test]
fn set_value_is_silent_by_default() {
    let hub = MemoryHub::new();
    let a = Session::join(&hub, "room").unwrap();
    let b = Session::join(&hub, "room").unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    b.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    a.set_value("quiet", json!(1));

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(b.get_value("quiet"), Some(json!(1)));
}
