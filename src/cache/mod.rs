//! Keyed cache layered on the bus
//!
//! Every mutation is applied locally and broadcast as a typed state-change
//! event on two channels: a per-key channel (`cache-object-<key>`) and the
//! cache instance's aggregate channel (`cache-change-<cache-instance-id>`).
//! Consumers stay reactive by subscribing to either stream; the cache itself
//! never hands out a mutable reference to its store.

use crate::bus::{ChannelStream, EventBus};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_stream::Stream;
use tracing::warn;
use uuid::Uuid;

/// Sender id the cache stamps on its broadcasts
const CACHE_SENDER: &str = "bus-cache";

/// A state transition broadcast by the cache on every mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStateChange {
    /// Application-defined tag describing the kind of change
    pub change_type: String,
    pub key: Uuid,
    pub value: Value,
}

/// Top-level property names of a value, sorted
///
/// Non-objects have no properties and yield an empty set.
fn top_level_keys(value: &Value) -> Vec<&str> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_unstable();
            keys
        }
        _ => Vec::new(),
    }
}

/// Coarse structural comparison: do two values have the same top-level
/// property-name set?
///
/// This is a cheap shape tag, not equality: `{"a":1,"b":2}` matches
/// `{"b":"x","a":null}`. It deliberately stays this narrow — widening it to
/// deep equality would change which events a shape-scoped stream delivers.
pub fn same_shape(a: &Value, b: &Value) -> bool {
    top_level_keys(a) == top_level_keys(b)
}

/// A keyed store whose mutations are bus events
///
/// At most one live value per key. Reads are pure; writes broadcast a
/// [`CacheStateChange`] on the aggregate channel and the key's own channel.
pub struct BusCache {
    bus: EventBus,
    store: Mutex<HashMap<Uuid, Value>>,
    change_channel: String,
}

impl BusCache {
    /// Create a cache on the given bus
    pub fn new(bus: EventBus) -> Self {
        let change_channel = format!("cache-change-{}", Uuid::new_v4());
        bus.open(&change_channel);

        Self {
            bus,
            store: Mutex::new(HashMap::new()),
            change_channel,
        }
    }

    /// Channel carrying every state change of the object stored under `key`
    pub fn object_channel(key: &Uuid) -> String {
        format!("cache-object-{key}")
    }

    /// This instance's aggregate state-change channel
    pub fn change_channel(&self) -> &str {
        &self.change_channel
    }

    /// Adopt a full keyed set, only into an empty cache
    ///
    /// Returns `true` iff the cache was empty before the call; otherwise
    /// nothing is mutated. All-or-nothing seeding keeps a live cache from
    /// being silently merged over.
    pub fn populate_cache(&self, items: HashMap<Uuid, Value>) -> bool {
        let mut store = self.store.lock();
        if store.is_empty() {
            *store = items;
            true
        } else {
            false
        }
    }

    /// Store a value and broadcast the state change on both channels
    ///
    /// Re-encaching an existing key replaces its value.
    pub fn encache(&self, key: Uuid, value: Value, change_type: &str) {
        self.store.lock().insert(key, value.clone());

        // The per-key channel may have been retired by an earlier remove
        self.bus.open(&Self::object_channel(&key));
        self.broadcast_change(change_type, key, value);
    }

    /// Current value under `key`, if any. Pure read, no broadcast.
    pub fn retrieve(&self, key: &Uuid) -> Option<Value> {
        self.store.lock().get(key).cloned()
    }

    /// Remove the value under `key`
    ///
    /// If the key exists: broadcasts the removal carrying the removed value,
    /// deletes the entry, closes the per-key channel, returns `true`.
    /// Otherwise `false` with no side effects.
    pub fn remove(&self, key: &Uuid, change_type: &str) -> bool {
        let removed = self.store.lock().remove(key);

        match removed {
            Some(value) => {
                self.broadcast_change(change_type, *key, value);
                self.bus.close(&Self::object_channel(key), CACHE_SENDER);
                true
            }
            None => false,
        }
    }

    /// Stream of values for state changes of `key` matching `change_type`
    ///
    /// Strict tag equality; events with any other change type are skipped.
    /// Each call opens a fresh subscription, so the stream is restartable
    /// and any number of consumers can watch the same key.
    pub fn notify_on_change(&self, key: &Uuid, change_type: &str) -> CacheStream {
        CacheStream {
            stream: self
                .bus
                .channel_stream(&Self::object_channel(key), CACHE_SENDER),
            change_type: change_type.to_string(),
            sample: None,
        }
    }

    /// Stream of values for all cache changes matching `change_type` whose
    /// value has the same top-level shape as `sample`
    ///
    /// Scoped to the aggregate channel and filtered first by change type,
    /// then by [`same_shape`] — a coarse type discriminator, not equality.
    pub fn notify_on_all_changes(&self, sample: Value, change_type: &str) -> CacheStream {
        CacheStream {
            stream: self.bus.channel_stream(&self.change_channel, CACHE_SENDER),
            change_type: change_type.to_string(),
            sample: Some(sample),
        }
    }

    /// Clear all entries
    ///
    /// Bulk reset bypasses per-key notification entirely, unlike [`remove`];
    /// no state-change events are broadcast and per-key channels stay open.
    ///
    /// [`remove`]: BusCache::remove
    pub fn reset_cache(&self) {
        self.store.lock().clear();
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    fn broadcast_change(&self, change_type: &str, key: Uuid, value: Value) {
        let change = CacheStateChange {
            change_type: change_type.to_string(),
            key,
            value,
        };

        let payload = match serde_json::to_value(&change) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "State change broadcast dropped");
                return;
            }
        };

        self.bus
            .send(&self.change_channel, payload.clone(), CACHE_SENDER);
        self.bus
            .send(&Self::object_channel(&key), payload, CACHE_SENDER);
    }
}

/// A filtered stream of cache values
///
/// Yields the `value` of each matching [`CacheStateChange`]; envelopes that
/// fail the change-type (and, for shape-scoped streams, shape) filter are
/// skipped. Terminates when the underlying channel closes.
pub struct CacheStream {
    stream: ChannelStream,
    change_type: String,
    sample: Option<Value>,
}

impl CacheStream {
    /// Receive the next matching value, or `None` once the channel closed
    pub async fn recv(&mut self) -> Option<Value> {
        while let Some(message) = self.stream.recv().await {
            if let Some(value) = self.filter(message.payload) {
                return Some(value);
            }
        }
        None
    }

    /// Receive the next matching value without waiting
    pub fn try_recv(&mut self) -> Option<Value> {
        while let Some(message) = self.stream.try_recv() {
            if let Some(value) = self.filter(message.payload) {
                return Some(value);
            }
        }
        None
    }

    fn filter(&self, payload: Value) -> Option<Value> {
        let change: CacheStateChange = serde_json::from_value(payload).ok()?;

        if change.change_type != self.change_type {
            return None;
        }

        if let Some(sample) = &self.sample {
            if !same_shape(sample, &change.value) {
                return None;
            }
        }

        Some(change.value)
    }
}

impl Stream for CacheStream {
    type Item = Value;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.stream).poll_next(cx) {
                Poll::Ready(Some(message)) => {
                    if let Some(value) = self.filter(message.payload) {
                        return Poll::Ready(Some(value));
                    }
                    // Filtered out, poll again
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
