//! Proxy activation configuration

/// Which side of the frame hierarchy this proxy sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
    /// Runs in the parent context and posts to child frames
    Parent,
    /// Runs in a child frame and posts to its parent
    Child,
}

/// Configuration accepted by [`EventBus::enable_message_proxy`]
///
/// Seeds the live authorization policy; everything here can be changed at
/// runtime through the returned [`ProxyControl`] handle.
///
/// [`EventBus::enable_message_proxy`]: crate::bus::EventBus::enable_message_proxy
/// [`ProxyControl`]: crate::proxy::ProxyControl
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Channel names the proxy is allowed to relay, in and out
    pub protected_channels: Vec<String>,
    /// Role of this proxy in the frame hierarchy
    pub proxy_type: ProxyType,
    /// Origins inbound events are accepted from; the first entry is also
    /// used as the target origin on outbound posts
    pub target_origin: Vec<String>,
    /// Forward outbound traffic to every reachable frame
    pub target_all_frames: bool,
    /// Explicitly targeted frames; a non-empty set suppresses
    /// `target_all_frames`
    pub target_specific_frames: Option<Vec<String>>,
}

impl ProxyConfig {
    /// Start a parent-side configuration
    pub fn parent() -> Self {
        Self::new(ProxyType::Parent)
    }

    /// Start a child-side configuration
    pub fn child() -> Self {
        Self::new(ProxyType::Child)
    }

    fn new(proxy_type: ProxyType) -> Self {
        Self {
            protected_channels: Vec::new(),
            proxy_type,
            target_origin: Vec::new(),
            target_all_frames: false,
            target_specific_frames: None,
        }
    }

    /// Authorize a channel for relay
    pub fn protected_channel(mut self, channel: impl Into<String>) -> Self {
        self.protected_channels.push(channel.into());
        self
    }

    /// Allow an origin
    pub fn target_origin(mut self, origin: impl Into<String>) -> Self {
        self.target_origin.push(origin.into());
        self
    }

    /// Forward to every reachable frame
    pub fn target_all_frames(mut self, enabled: bool) -> Self {
        self.target_all_frames = enabled;
        self
    }

    /// Target a specific frame
    pub fn target_frame(mut self, frame: impl Into<String>) -> Self {
        self.target_specific_frames
            .get_or_insert_with(Vec::new)
            .push(frame.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_chain() {
        let config = ProxyConfig::parent()
            .protected_channel("auth-chan1")
            .target_origin("http://somewhere.out.there")
            .target_all_frames(true);

        assert_eq!(config.proxy_type, ProxyType::Parent);
        assert_eq!(config.protected_channels, vec!["auth-chan1"]);
        assert_eq!(config.target_origin, vec!["http://somewhere.out.there"]);
        assert!(config.target_all_frames);
        assert!(config.target_specific_frames.is_none());
    }

    #[test]
    fn test_target_frame_accumulates() {
        let config = ProxyConfig::child().target_frame("ember").target_frame("cotton");

        assert_eq!(
            config.target_specific_frames,
            Some(vec!["ember".to_string(), "cotton".to_string()])
        );
    }
}
