//! Message envelopes
//!
//! Every payload that travels on the bus is wrapped in a [`Message`]: the
//! payload plus routing and correlation metadata. Envelopes are immutable
//! once dispatched; subscribers receive clones.
//!
//! The serialized form is the wire shape the cross-context proxy accepts and
//! emits:
//!
//! ```json
//! {"direction":"response","correlationId":"...","channel":"orders",
//!  "payload":{...},"senderId":"order-service","isError":false}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Direction of an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// A request expecting a correlated response
    Request,
    /// A response or plain broadcast
    Response,
    /// An error response
    Error,
}

/// An envelope carrying one payload across one channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub direction: Direction,
    /// Links a request to its response; absent on plain broadcasts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// The channel this envelope was dispatched on
    pub channel: String,
    #[serde(default)]
    pub payload: Value,
    pub sender_id: String,
    #[serde(default)]
    pub is_error: bool,
}

impl Message {
    /// Build a request envelope with a fresh correlation id
    pub fn request(channel: impl Into<String>, payload: Value, sender: impl Into<String>) -> Self {
        Self {
            direction: Direction::Request,
            correlation_id: Some(Uuid::new_v4().to_string()),
            channel: channel.into(),
            payload,
            sender_id: sender.into(),
            is_error: false,
        }
    }

    /// Build a plain broadcast envelope (response direction, no correlation)
    pub fn broadcast(channel: impl Into<String>, payload: Value, sender: impl Into<String>) -> Self {
        Self {
            direction: Direction::Response,
            correlation_id: None,
            channel: channel.into(),
            payload,
            sender_id: sender.into(),
            is_error: false,
        }
    }

    /// Build a response envelope correlated to a request
    pub fn response(
        channel: impl Into<String>,
        payload: Value,
        correlation_id: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            direction: Direction::Response,
            correlation_id: Some(correlation_id.into()),
            channel: channel.into(),
            payload,
            sender_id: sender.into(),
            is_error: false,
        }
    }

    /// Build an error envelope correlated to a request
    pub fn error(
        channel: impl Into<String>,
        payload: Value,
        correlation_id: impl Into<String>,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            direction: Direction::Error,
            correlation_id: Some(correlation_id.into()),
            channel: channel.into(),
            payload,
            sender_id: sender.into(),
            is_error: true,
        }
    }

    /// Whether this envelope answers the given correlation id
    pub fn answers(&self, correlation_id: &str) -> bool {
        self.direction != Direction::Request
            && self.correlation_id.as_deref() == Some(correlation_id)
    }
}
