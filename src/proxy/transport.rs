//! Abstract cross-context transport boundary

use crate::bus::Message;
use async_trait::async_trait;
use serde_json::Value;

/// A raw event arriving from the untrusted transport
///
/// `origin` is metadata supplied by the transport layer, not by the remote
/// producer; `data` is whatever the remote side posted, trusted for nothing
/// until the proxy's validation pipeline has passed it.
#[derive(Debug, Clone)]
pub struct TransportEvent {
    pub origin: String,
    pub data: Value,
}

impl TransportEvent {
    pub fn new(origin: impl Into<String>, data: Value) -> Self {
        Self {
            origin: origin.into(),
            data,
        }
    }
}

/// What the inbound validation pipeline decided about one transport event
///
/// Rejections are never raised to the remote producer — it sits outside the
/// trust boundary — but each path is reported here so it stays
/// independently testable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Envelope validated and injected into the local bus
    Delivered { channel: String },
    /// Proxy is stopped; the event was not processed
    NotListening,
    /// The event's origin is not in the allowed-origins set
    RefusedOrigin,
    /// The raw data, or the envelope's payload, carried no content
    EmptyPayload,
    /// The data was not a bus envelope
    NotForBus,
    /// The envelope named a channel outside the authorized set
    UnauthorizedChannel,
}

/// The outbound half of the trust boundary
///
/// Implementations post an envelope to a named remote frame; the bundled
/// target origin lets origin-enforcing transports drop mis-addressed posts.
#[async_trait]
pub trait FrameTransport: Send + Sync {
    /// Post an envelope to the named remote frame
    async fn post(&self, frame: &str, target_origin: &str, envelope: &Message);

    /// Frames currently reachable within this transport's scope
    fn reachable_frames(&self) -> Vec<String>;
}
