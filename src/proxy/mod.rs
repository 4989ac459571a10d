//! Cross-context proxy
//!
//! Relays bus traffic across a trust boundary: two bus instances in separate
//! execution contexts that can only exchange messages through an untrusted
//! postMessage-style transport. Every inbound event is validated against a
//! live allow-list policy (origins, frames, channel names) before it is
//! allowed anywhere near the local bus; outbound traffic on authorized
//! channels is forwarded to permitted remote frames.

mod config;
mod control;
mod transport;

pub use config::{ProxyConfig, ProxyType};
pub use control::ProxyControl;
pub use transport::{FrameTransport, InboundOutcome, TransportEvent};
