//! Crossbus - in-process pub/sub message bus with a reactive cache and an
//! origin-checked cross-context proxy
//!
//! One named-channel abstraction carries three things: fire-and-forget and
//! request/response messaging between application components, a keyed cache
//! that re-publishes its own state transitions as bus events, and a proxy
//! that relays bus traffic across trust boundaries after validating origin,
//! frame and channel against a live allow-list policy.

pub mod bus;
pub mod cache;
pub mod error;
pub mod proxy;

pub use bus::{BusOptions, ChannelStream, Direction, EventBus, Message, PendingRequest};
pub use cache::{BusCache, CacheStateChange, CacheStream};
pub use error::{BusError, Result};
pub use proxy::{
    FrameTransport, InboundOutcome, ProxyConfig, ProxyControl, ProxyType, TransportEvent,
};
