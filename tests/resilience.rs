//! The bus must keep running through stale producers, malformed traffic and
//! misbehaving subscribers

use async_trait::async_trait;
use crossbus::{
    BusCache, BusError, BusOptions, EventBus, FrameTransport, InboundOutcome, Message,
    ProxyConfig, TransportEvent,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

fn quiet_bus() -> EventBus {
    EventBus::with_options(BusOptions::default().quiet())
}

struct NullTransport;

#[async_trait]
impl FrameTransport for NullTransport {
    async fn post(&self, _frame: &str, _target_origin: &str, _envelope: &Message) {}
    fn reachable_frames(&self) -> Vec<String> {
        Vec::new()
    }
}

#[tokio::test]
async fn test_stale_producer_cannot_break_the_bus() {
    let bus = quiet_bus();

    let mut stream = bus.channel_stream("live", "sub");
    bus.close("gone", "owner");

    // Sends to a closed and a never-opened channel are dropped, not fatal
    assert_eq!(bus.send("gone", json!(1), "stale"), 0);
    assert_eq!(bus.send("never-opened", json!(1), "stale"), 0);

    // The rest of the bus is unaffected
    bus.send("live", json!({"ok": true}), "producer");
    let msg = timeout(Duration::from_millis(100), stream.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.payload["ok"], true);
}

#[tokio::test]
async fn test_request_timeout_leaves_bus_usable() {
    let bus = quiet_bus();

    let result = bus
        .request_once_with_timeout("silent", json!(1), "asker", Duration::from_millis(20))
        .response()
        .await;
    assert!(matches!(result, Err(BusError::CorrelationTimeout { .. })));

    // The timed-out request released its subscription
    assert_eq!(bus.subscriber_count("silent"), 0);

    // A later request on the same channel still works
    let pending = bus.request_once("silent", json!(2), "asker");
    let cid = pending.correlation_id().to_string();
    bus.send_response("silent", json!("late but present"), &cid, "responder");
    assert!(pending.response().await.is_ok());
}

#[tokio::test]
async fn test_malformed_inbound_storm_does_not_stop_proxy() {
    let bus = quiet_bus();

    let control = bus.enable_message_proxy(
        ProxyConfig::parent()
            .protected_channel("auth-chan1")
            .target_origin("http://a"),
        Arc::new(NullTransport),
    );

    let garbage: Vec<Value> = vec![
        json!("plain string"),
        json!(""),
        Value::Null,
        json!(42),
        json!({"data": "nope"}),
        json!({"direction": "sideways", "channel": "auth-chan1", "payload": 1, "senderId": "x"}),
        json!([1, 2, 3]),
    ];

    for data in garbage {
        let outcome = control.handle_inbound(TransportEvent::new("http://a", data));
        assert!(!matches!(outcome, InboundOutcome::Delivered { .. }));
    }

    // Still listening, and a valid envelope still lands
    assert!(control.is_listening());

    let mut stream = bus.channel_stream("auth-chan1", "consumer");
    let outcome = control.handle_inbound(TransportEvent::new(
        "http://a",
        json!({
            "direction": "response",
            "channel": "auth-chan1",
            "payload": {"survived": true},
            "senderId": "remote"
        }),
    ));
    assert!(matches!(outcome, InboundOutcome::Delivered { .. }));

    let msg = timeout(Duration::from_millis(100), stream.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(msg.payload["survived"], true);
}

#[tokio::test]
async fn test_abandoned_subscribers_do_not_starve_the_rest() {
    let bus = quiet_bus();

    // Half the subscribers vanish without unsubscribing
    let mut kept = Vec::new();
    for i in 0..10 {
        let stream = bus.channel_stream("busy", &format!("sub-{i}"));
        if i % 2 == 0 {
            kept.push(stream);
        }
    }

    for n in 0..20u64 {
        bus.send("busy", json!({ "n": n }), "producer");
    }

    for stream in kept.iter_mut() {
        for n in 0..20u64 {
            let msg = timeout(Duration::from_millis(100), stream.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(msg.payload["n"], n);
        }
    }
}

#[tokio::test]
async fn test_concurrent_cache_mutation_stays_consistent() {
    let bus = quiet_bus();
    let cache = Arc::new(BusCache::new(bus));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let key = Uuid::new_v4();
            cache.encache(key, json!({"v": 1}), "created");
            assert_eq!(cache.retrieve(&key), Some(json!({"v": 1})));
            assert!(cache.remove(&key, "deleted"));
            key
        }));
    }

    for handle in handles {
        let key = handle.await.unwrap();
        assert_eq!(cache.retrieve(&key), None);
    }

    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_policy_revocation_applies_to_next_message() {
    let bus = quiet_bus();

    let control = bus.enable_message_proxy(
        ProxyConfig::parent()
            .protected_channel("auth-chan1")
            .target_origin("http://a"),
        Arc::new(NullTransport),
    );

    let envelope = json!({
        "direction": "response",
        "channel": "auth-chan1",
        "payload": {"n": 1},
        "senderId": "remote"
    });

    let outcome = control.handle_inbound(TransportEvent::new("http://a", envelope.clone()));
    assert!(matches!(outcome, InboundOutcome::Delivered { .. }));

    // Revoke the origin: the very next message is refused
    control.remove_allowed_target_origin("http://a");
    let outcome = control.handle_inbound(TransportEvent::new("http://a", envelope));
    assert_eq!(outcome, InboundOutcome::RefusedOrigin);
}
