//! The message bus
//!
//! [`EventBus`] is an explicit context object: construct one, pass it to the
//! components that need it, and drop or [`shutdown`](EventBus::shutdown) it
//! when done. It is cheaply cloneable; clones share the same channel table.

mod envelope;
mod registry;

pub use envelope::{Direction, Message};
pub use registry::ChannelStream;

use registry::ChannelRegistry;

use crate::error::{BusError, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Options for constructing a bus
#[derive(Debug, Clone)]
pub struct BusOptions {
    /// Log an info-level banner when the bus comes up
    pub boot_banner: bool,
    /// Deadline applied to `request_once` when no explicit timeout is given;
    /// `None` waits indefinitely
    pub default_request_timeout: Option<Duration>,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            boot_banner: true,
            default_request_timeout: None,
        }
    }
}

impl BusOptions {
    /// Suppress the boot banner
    pub fn quiet(mut self) -> Self {
        self.boot_banner = false;
        self
    }

    /// Set the default request/response deadline
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.default_request_timeout = Some(timeout);
        self
    }
}

struct BusInner {
    id: Uuid,
    registry: ChannelRegistry,
    options: BusOptions,
}

/// The message bus: named channels carrying typed envelopes
///
/// All sends fan out synchronously to current subscribers in registration
/// order; per-channel delivery order matches send order. No ordering is
/// guaranteed across distinct channels.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a bus with default options
    pub fn new() -> Self {
        Self::with_options(BusOptions::default())
    }

    /// Create a bus with explicit options
    pub fn with_options(options: BusOptions) -> Self {
        let id = Uuid::new_v4();

        if options.boot_banner {
            info!(bus_id = %id, "Bus online");
        }

        Self {
            inner: Arc::new(BusInner {
                id,
                registry: ChannelRegistry::new(),
                options,
            }),
        }
    }

    /// Unique id of this bus instance
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Create the named channel if it does not exist. Idempotent.
    pub fn open(&self, name: &str) {
        self.inner.registry.open(name);
    }

    /// Tear down all subscriptions on the named channel and retire it
    pub fn close(&self, name: &str, owner: &str) {
        self.inner.registry.close(name, owner);
    }

    /// Close every channel. Late producers log a warning and are dropped.
    pub fn shutdown(&self) {
        debug!(bus_id = %self.inner.id, "Bus shutting down");
        self.inner.registry.close_all("bus");
    }

    /// Continuous observable of every envelope on the named channel
    ///
    /// Auto-creates the channel on first use.
    pub fn channel_stream(&self, name: &str, sender: &str) -> ChannelStream {
        self.inner.registry.subscribe(name, sender)
    }

    /// Fire-and-forget broadcast of a payload on the named channel
    ///
    /// The payload is wrapped in a response-direction envelope with no
    /// correlation id. Returns the number of subscribers reached; sends to
    /// unknown or closed channels are dropped with a logged warning.
    pub fn send(&self, channel: &str, payload: Value, sender: &str) -> usize {
        self.send_message(&Message::broadcast(channel, payload, sender))
    }

    /// Send a request envelope with a caller-supplied correlation id
    pub fn send_request(
        &self,
        channel: &str,
        payload: Value,
        correlation_id: &str,
        sender: &str,
    ) -> usize {
        self.send_message(&Message {
            direction: Direction::Request,
            correlation_id: Some(correlation_id.to_string()),
            channel: channel.to_string(),
            payload,
            sender_id: sender.to_string(),
            is_error: false,
        })
    }

    /// Send a response envelope correlated to a request
    pub fn send_response(
        &self,
        channel: &str,
        payload: Value,
        correlation_id: &str,
        sender: &str,
    ) -> usize {
        self.send_message(&Message::response(channel, payload, correlation_id, sender))
    }

    /// Send an error envelope correlated to a request
    pub fn send_error(
        &self,
        channel: &str,
        payload: Value,
        correlation_id: &str,
        sender: &str,
    ) -> usize {
        self.send_message(&Message::error(channel, payload, correlation_id, sender))
    }

    /// Reply to a request envelope on its own channel
    ///
    /// No-op if the request carries no correlation id.
    pub fn respond(&self, request: &Message, payload: Value, sender: &str) -> usize {
        match &request.correlation_id {
            Some(cid) => self.send_response(&request.channel, payload, cid, sender),
            None => {
                debug!(channel = %request.channel, "Respond dropped, request has no correlation id");
                0
            }
        }
    }

    /// Dispatch a fully formed envelope on its channel
    pub fn send_message(&self, message: &Message) -> usize {
        self.inner.registry.send(&message.channel, message)
    }

    /// Send a request and await the single correlated response
    ///
    /// A fresh correlation id is generated; the returned [`PendingRequest`]
    /// resolves with the first response or error envelope sharing that id and
    /// then unsubscribes. Other traffic on the channel is ignored. The bus
    /// default timeout applies, if one was configured.
    pub fn request_once(&self, channel: &str, payload: Value, sender: &str) -> PendingRequest {
        self.request_once_inner(channel, payload, sender, self.inner.options.default_request_timeout)
    }

    /// [`request_once`](EventBus::request_once) with an explicit deadline
    pub fn request_once_with_timeout(
        &self,
        channel: &str,
        payload: Value,
        sender: &str,
        timeout: Duration,
    ) -> PendingRequest {
        self.request_once_inner(channel, payload, sender, Some(timeout))
    }

    fn request_once_inner(
        &self,
        channel: &str,
        payload: Value,
        sender: &str,
        timeout: Option<Duration>,
    ) -> PendingRequest {
        let correlation_id = Uuid::new_v4().to_string();

        // Subscribe before sending so a synchronous responder cannot race us
        let stream = self.inner.registry.subscribe(channel, sender);
        self.send_request(channel, payload, &correlation_id, sender);

        PendingRequest {
            channel: channel.to_string(),
            correlation_id,
            stream,
            timeout,
        }
    }

    /// Whether the named channel is currently open
    pub fn channel_exists(&self, name: &str) -> bool {
        self.inner.registry.channel_exists(name)
    }

    /// Number of active subscriptions on the named channel
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.inner.registry.subscriber_count(name)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// A single-shot request awaiting its correlated response
///
/// Resolves with the first response or error envelope carrying the request's
/// correlation id, then unsubscribes. Success and failure share one await
/// point: a timeout or channel closure surfaces as a [`BusError`] from
/// [`response`](PendingRequest::response).
pub struct PendingRequest {
    channel: String,
    correlation_id: String,
    stream: ChannelStream,
    timeout: Option<Duration>,
}

impl PendingRequest {
    /// Correlation id linking this request to its response
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Await the first correlated response or error envelope
    pub async fn response(mut self) -> Result<Message> {
        let channel = self.channel.clone();
        let correlation_id = self.correlation_id.clone();
        let stream = &mut self.stream;

        let wait = async move {
            while let Some(message) = stream.recv().await {
                if message.answers(&correlation_id) {
                    return Ok(message);
                }
            }
            Err(BusError::ChannelClosed { channel })
        };

        match self.timeout {
            Some(deadline) => match tokio::time::timeout(deadline, wait).await {
                Ok(result) => result,
                Err(_) => Err(BusError::CorrelationTimeout {
                    channel: self.channel.clone(),
                }),
            },
            None => wait.await,
        }
    }
}
