//! [`BridgeConfig`] – the registry plus the bus namespace.
//!
//! Built once at startup and immutable afterwards.  Owns the only place where
//! topics and channels are converted into each other.

use tvbridge_types::Channel;

use crate::registry::ChannelRegistry;

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    namespace: String,
    registry: ChannelRegistry,
}

impl BridgeConfig {
    /// `namespace` is the topic prefix, e.g. `home/livingroom/tv`.  Trailing
    /// slashes are ignored.
    pub fn new(namespace: impl Into<String>, registry: ChannelRegistry) -> Self {
        let namespace = namespace.into().trim_end_matches('/').to_string();
        Self { namespace, registry }
    }

    /// Standard registry under `namespace`.
    pub fn standard(namespace: impl Into<String>) -> Self {
        Self::new(namespace, ChannelRegistry::standard())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// `{namespace}/{channel}`.
    pub fn topic_for(&self, channel: Channel) -> String {
        if self.namespace.is_empty() {
            channel.as_str().to_string()
        } else {
            format!("{}/{}", self.namespace, channel)
        }
    }

    /// Every topic the bridge subscribes to, in registry order.
    pub fn topics(&self) -> Vec<String> {
        self.registry.channels().map(|c| self.topic_for(c)).collect()
    }

    /// Strip the namespace and resolve the remainder to a registered channel.
    pub fn channel_for_topic(&self, topic: &str) -> Option<Channel> {
        let name = if self.namespace.is_empty() {
            topic
        } else {
            topic.strip_prefix(self.namespace.as_str())?.strip_prefix('/')?
        };
        self.registry.resolve(name)
    }
}
