//! Proxy state machine, live policy and the inbound validation pipeline

use crate::bus::{EventBus, Message};
use crate::proxy::config::{ProxyConfig, ProxyType};
use crate::proxy::transport::{FrameTransport, InboundOutcome, TransportEvent};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sender id stamped on every envelope the proxy injects; outbound relay
/// skips envelopes carrying it, which is what keeps two proxied buses from
/// ping-ponging the same message.
const PROXY_SENDER: &str = "message-proxy";

/// The live authorization policy
///
/// Insertion order is preserved so configuration surfaces read back in the
/// order they were built.
struct ProxyPolicy {
    allowed_origins: Vec<String>,
    authorized_channels: Vec<String>,
    targeted_frames: Vec<String>,
    target_all_frames: bool,
}

impl ProxyPolicy {
    /// All-frames mode only takes effect while no explicit frame is targeted
    fn is_targeting_all_frames(&self) -> bool {
        self.target_all_frames && self.targeted_frames.is_empty()
    }
}

struct ControlInner {
    bus: EventBus,
    transport: Arc<dyn FrameTransport>,
    proxy_type: ProxyType,
    policy: Arc<Mutex<ProxyPolicy>>,
    listening: Arc<AtomicBool>,
    /// One forwarding task per authorized channel, alive while listening
    relays: Mutex<HashMap<String, JoinHandle<()>>>,
}

/// Live control handle for a cross-context proxy
///
/// Cloneable; all clones drive the same proxy. Policy mutators work in any
/// state and take effect on the next inbound or outbound message.
#[derive(Clone)]
pub struct ProxyControl {
    inner: Arc<ControlInner>,
}

impl EventBus {
    /// Activate a cross-context proxy on this bus
    ///
    /// The proxy starts listening immediately. Must be called within a Tokio
    /// runtime: outbound relaying runs on background tasks.
    pub fn enable_message_proxy(
        &self,
        config: ProxyConfig,
        transport: Arc<dyn FrameTransport>,
    ) -> ProxyControl {
        ProxyControl::activate(self.clone(), config, transport)
    }
}

impl ProxyControl {
    fn activate(bus: EventBus, config: ProxyConfig, transport: Arc<dyn FrameTransport>) -> Self {
        let policy = ProxyPolicy {
            allowed_origins: config.target_origin,
            authorized_channels: config.protected_channels,
            targeted_frames: config.target_specific_frames.unwrap_or_default(),
            target_all_frames: config.target_all_frames,
        };

        let control = Self {
            inner: Arc::new(ControlInner {
                bus,
                transport,
                proxy_type: config.proxy_type,
                policy: Arc::new(Mutex::new(policy)),
                listening: Arc::new(AtomicBool::new(false)),
                relays: Mutex::new(HashMap::new()),
            }),
        };

        control.start_listening();
        control
    }

    // ---- state machine ----

    /// Whether the proxy is currently processing transport traffic
    pub fn is_listening(&self) -> bool {
        self.inner.listening.load(Ordering::SeqCst)
    }

    /// Resume processing inbound events and relaying outbound traffic
    pub fn start_listening(&self) {
        if self.inner.listening.swap(true, Ordering::SeqCst) {
            return;
        }

        let channels = self.inner.policy.lock().authorized_channels.clone();
        for channel in channels {
            self.spawn_relay(&channel);
        }

        debug!(channels = self.inner.relays.lock().len(), "Proxy listening");
    }

    /// Stop processing; inbound events are ignored and relay tasks end
    pub fn stop_listening(&self) {
        if !self.inner.listening.swap(false, Ordering::SeqCst) {
            return;
        }

        for (_, relay) in self.inner.relays.lock().drain() {
            relay.abort();
        }

        debug!("Proxy stopped");
    }

    // ---- policy mutators ----

    /// Accept inbound events from another origin
    pub fn add_allowed_target_origin(&self, origin: &str) {
        let mut policy = self.inner.policy.lock();
        if !policy.allowed_origins.iter().any(|o| o == origin) {
            policy.allowed_origins.push(origin.to_string());
        }
    }

    /// Stop accepting inbound events from an origin
    pub fn remove_allowed_target_origin(&self, origin: &str) {
        self.inner.policy.lock().allowed_origins.retain(|o| o != origin);
    }

    /// Target a specific remote frame for outbound relay
    ///
    /// Any explicit frame suppresses all-frames mode until the set is
    /// emptied again.
    pub fn add_targeted_frame(&self, frame: &str) {
        let mut policy = self.inner.policy.lock();
        if !policy.targeted_frames.iter().any(|f| f == frame) {
            policy.targeted_frames.push(frame.to_string());
        }
    }

    /// Stop targeting a specific remote frame
    pub fn remove_targeted_frame(&self, frame: &str) {
        self.inner.policy.lock().targeted_frames.retain(|f| f != frame);
    }

    /// Set the all-frames flag
    ///
    /// Only effective while the explicit targeted-frame set is empty; see
    /// [`is_targeting_all_frames`](ProxyControl::is_targeting_all_frames).
    pub fn target_all_frames(&self, enabled: bool) {
        self.inner.policy.lock().target_all_frames = enabled;
    }

    /// Authorize a channel for relay, in and out
    pub fn add_authorized_channel(&self, channel: &str) {
        {
            let mut policy = self.inner.policy.lock();
            if policy.authorized_channels.iter().any(|c| c == channel) {
                return;
            }
            policy.authorized_channels.push(channel.to_string());
        }

        if self.is_listening() {
            self.spawn_relay(channel);
        }
    }

    /// Revoke a channel's authorization
    pub fn remove_authorized_channel(&self, channel: &str) {
        self.inner
            .policy
            .lock()
            .authorized_channels
            .retain(|c| c != channel);

        if let Some(relay) = self.inner.relays.lock().remove(channel) {
            relay.abort();
        }
    }

    // ---- policy getters ----

    /// Origins inbound events are accepted from
    pub fn allowed_origins(&self) -> Vec<String> {
        self.inner.policy.lock().allowed_origins.clone()
    }

    /// Explicitly targeted remote frames
    pub fn targeted_frames(&self) -> Vec<String> {
        self.inner.policy.lock().targeted_frames.clone()
    }

    /// Channels authorized for relay
    pub fn authorized_channels(&self) -> Vec<String> {
        self.inner.policy.lock().authorized_channels.clone()
    }

    /// Derived predicate: the all-frames flag is set AND no explicit frame
    /// is currently targeted
    pub fn is_targeting_all_frames(&self) -> bool {
        self.inner.policy.lock().is_targeting_all_frames()
    }

    // ---- inbound ----

    /// Run one raw transport event through the validation pipeline
    ///
    /// Called by the transport layer for every inbound event. Rejections are
    /// dropped and logged, never raised: the producer is outside the trust
    /// boundary. On success the envelope is injected into the local bus on
    /// the channel it names, stamped with the proxy's sender id.
    pub fn handle_inbound(&self, event: TransportEvent) -> InboundOutcome {
        if !self.is_listening() {
            debug!("Message Ignored, proxy is not listening");
            return InboundOutcome::NotListening;
        }

        let origin_allowed = {
            let policy = self.inner.policy.lock();
            policy.allowed_origins.iter().any(|o| o == &event.origin)
        };
        if !origin_allowed {
            warn!("Message refused, origin not registered: {}", event.origin);
            return InboundOutcome::RefusedOrigin;
        }

        if is_empty_payload(&event.data) {
            debug!("Message Ignored, it contains no payload");
            return InboundOutcome::EmptyPayload;
        }

        let mut envelope: Message = match serde_json::from_value(event.data) {
            Ok(envelope) => envelope,
            Err(_) => {
                debug!("Message Ignored, not intended for the bus.");
                return InboundOutcome::NotForBus;
            }
        };

        if is_empty_payload(&envelope.payload) {
            debug!("Message Ignored, it contains no payload");
            return InboundOutcome::EmptyPayload;
        }

        let authorized = {
            let policy = self.inner.policy.lock();
            policy
                .authorized_channels
                .iter()
                .any(|c| c == &envelope.channel)
        };
        if !authorized {
            warn!(
                "Message refused, channel is not authorized: {}",
                envelope.channel
            );
            return InboundOutcome::UnauthorizedChannel;
        }

        envelope.sender_id = PROXY_SENDER.to_string();
        let channel = envelope.channel.clone();
        self.inner.bus.send_message(&envelope);

        debug!(channel = %channel, origin = %event.origin, "Proxied message injected");
        InboundOutcome::Delivered { channel }
    }

    // ---- outbound ----

    fn spawn_relay(&self, channel: &str) {
        let mut stream = self.inner.bus.channel_stream(channel, PROXY_SENDER);
        let transport = self.inner.transport.clone();
        let policy = self.inner.policy.clone();
        let listening = self.inner.listening.clone();
        let proxy_type = self.inner.proxy_type;
        let channel_name = channel.to_string();

        let handle = tokio::spawn(async move {
            while let Some(envelope) = stream.recv().await {
                if envelope.sender_id == PROXY_SENDER {
                    continue;
                }
                if !listening.load(Ordering::SeqCst) {
                    continue;
                }

                let (frames, target_origin) = {
                    let policy = policy.lock();
                    let frames = match proxy_type {
                        // A child always posts up to its parent
                        ProxyType::Child => transport.reachable_frames(),
                        ProxyType::Parent => {
                            if policy.is_targeting_all_frames() {
                                transport.reachable_frames()
                            } else {
                                policy.targeted_frames.clone()
                            }
                        }
                    };
                    let target_origin = policy
                        .allowed_origins
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "*".to_string());
                    (frames, target_origin)
                };

                if frames.is_empty() {
                    debug!(channel = %channel_name, "Relay skipped, no target frames");
                    continue;
                }

                for frame in &frames {
                    transport.post(frame, &target_origin, &envelope).await;
                }
            }
        });

        self.inner.relays.lock().insert(channel.to_string(), handle);
    }
}

/// Null and the empty string carry no content
fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
