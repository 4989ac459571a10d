//! Channel table, subscriptions and message fan-out

use crate::bus::envelope::Message;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::{debug, warn};

/// One observer registered with one channel
struct Subscriber {
    id: u64,
    owner: String,
    tx: mpsc::UnboundedSender<Message>,
}

/// A named channel: an ordered subscriber list plus an open/closed flag
pub(crate) struct BusChannel {
    name: String,
    closed: AtomicBool,
    /// Fan-out iterates under this lock, which is what gives a single
    /// channel its total delivery order.
    subscribers: Mutex<Vec<Subscriber>>,
    next_sub_id: AtomicU64,
}

impl BusChannel {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            closed: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
            next_sub_id: AtomicU64::new(1),
        })
    }

    fn subscribe(self: &Arc<Self>, owner: &str) -> ChannelStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_sub_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers.lock().push(Subscriber {
            id,
            owner: owner.to_string(),
            tx,
        });

        debug!(channel = %self.name, owner = owner, "Subscription created");

        ChannelStream {
            channel: self.clone(),
            sub_id: id,
            rx,
        }
    }

    /// Deliver to every current subscriber in registration order
    fn fan_out(&self, message: &Message) -> usize {
        let mut subscribers = self.subscribers.lock();
        let mut delivered = 0;

        for sub in subscribers.iter() {
            if sub.tx.send(message.clone()).is_ok() {
                delivered += 1;
            } else {
                // Receiver dropped without unsubscribing; skip and keep going
                debug!(
                    channel = %self.name,
                    owner = %sub.owner,
                    "Subscriber gone, skipping delivery"
                );
            }
        }

        subscribers.retain(|s| !s.tx.is_closed());
        delivered
    }

    fn remove_subscriber(&self, sub_id: u64) {
        self.subscribers.lock().retain(|s| s.id != sub_id);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders terminates every stream once drained
        self.subscribers.lock().clear();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Owns the set of named channels and their lifecycle
///
/// Channels are created by `open`, or lazily on first subscribe. Closing a
/// channel tears down all of its subscriptions and removes the name; a later
/// `open` or subscribe starts over with a fresh channel, never a reused
/// subscriber list.
pub(crate) struct ChannelRegistry {
    channels: DashMap<String, Arc<BusChannel>>,
}

impl ChannelRegistry {
    pub(crate) fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Create the channel if it does not exist. Idempotent by name.
    pub(crate) fn open(&self, name: &str) {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| BusChannel::new(name));
    }

    /// Subscribe an observer, creating the channel on first use
    pub(crate) fn subscribe(&self, name: &str, owner: &str) -> ChannelStream {
        let channel = self
            .channels
            .entry(name.to_string())
            .or_insert_with(|| BusChannel::new(name))
            .clone();

        channel.subscribe(owner)
    }

    /// Fan a message out to all current subscribers of the named channel
    ///
    /// Sends to unknown or closed names are dropped, not raised: a stale
    /// producer must not take the bus down. Returns the delivered count.
    pub(crate) fn send(&self, name: &str, message: &Message) -> usize {
        let Some(channel) = self.channels.get(name).map(|c| c.clone()) else {
            warn!(channel = name, sender = %message.sender_id, "Send dropped, channel not open");
            return 0;
        };

        if channel.is_closed() {
            warn!(channel = name, sender = %message.sender_id, "Send dropped, channel closed");
            return 0;
        }

        channel.fan_out(message)
    }

    /// Tear down all subscriptions for the name and retire it
    pub(crate) fn close(&self, name: &str, owner: &str) {
        if let Some((_, channel)) = self.channels.remove(name) {
            channel.close();
            debug!(channel = name, owner = owner, "Channel closed");
        } else {
            debug!(channel = name, owner = owner, "Close ignored, channel not open");
        }
    }

    /// Close every channel (bus teardown)
    pub(crate) fn close_all(&self, owner: &str) {
        let names: Vec<String> = self.channels.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.close(&name, owner);
        }
    }

    pub(crate) fn channel_exists(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub(crate) fn subscriber_count(&self, name: &str) -> usize {
        self.channels
            .get(name)
            .map(|c| c.subscribers.lock().len())
            .unwrap_or(0)
    }
}

/// A live subscription to one channel
///
/// Envelopes queue in arrival order and are drained with [`recv`] or
/// [`try_recv`]; the handle also implements `Stream`. Dropping the handle
/// unsubscribes. When the channel closes, queued envelopes still drain and
/// the stream then terminates.
///
/// [`recv`]: ChannelStream::recv
/// [`try_recv`]: ChannelStream::try_recv
pub struct ChannelStream {
    channel: Arc<BusChannel>,
    sub_id: u64,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl ChannelStream {
    /// Name of the channel this subscription observes
    pub fn channel_name(&self) -> &str {
        &self.channel.name
    }

    /// Receive the next envelope, or `None` once the channel has closed
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Receive the next envelope without waiting
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Explicitly revoke the subscription
    pub fn unsubscribe(self) {}
}

impl Drop for ChannelStream {
    fn drop(&mut self) {
        self.channel.remove_subscriber(self.sub_id);
    }
}

impl Stream for ChannelStream {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
