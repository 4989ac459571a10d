//! Error types for the bus

use thiserror::Error;

/// Errors that can surface from bus operations
///
/// Most failure conditions on the bus are deliberately not errors: sends to
/// closed channels are dropped and logged, cache invariant violations are
/// boolean returns, and proxy rejections are logged outcomes. Only the
/// request/response path can fail in a way the caller must handle.
#[derive(Error, Debug)]
pub enum BusError {
    /// No matching response arrived inside the timeout window
    #[error("request on channel '{channel}' timed out")]
    CorrelationTimeout { channel: String },

    /// The channel closed while a request was still pending
    #[error("channel '{channel}' closed while awaiting a response")]
    ChannelClosed { channel: String },

    /// Failed to serialize/deserialize a payload
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for bus operations
pub type Result<T> = std::result::Result<T, BusError>;
