//! [`EventRouter`] – device events → retained bus publishes.
//!
//! For each event the router resolves the interested channels from the
//! registry, runs their transforms, and publishes every value that passes the
//! dedup gate to `{namespace}/{channel}`.  A malformed payload skips that one
//! transform; nothing here stops the router.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use tvbridge_middleware::MessageBus;
use tvbridge_types::DeviceEvent;

use crate::config::BridgeConfig;
use crate::registry::ChannelUpdate;
use crate::state_store::StateStore;

pub struct EventRouter {
    config: Arc<BridgeConfig>,
}

impl EventRouter {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        Self { config }
    }

    /// Route one event.  Returns the updates that passed the dedup gate, in
    /// publish order.
    #[instrument(skip_all, fields(kind = %event.kind, event_id = %event.id))]
    pub async fn route(
        &self,
        event: &DeviceEvent,
        store: &mut StateStore,
        bus: &dyn MessageBus,
    ) -> Vec<ChannelUpdate> {
        let mut accepted = Vec::new();
        let mut interested = false;

        for (channel, transform) in self.config.registry().for_event(event.kind) {
            interested = true;
            let updates = match transform(&event.payload) {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(%channel, error = %e, "dropping malformed event payload");
                    continue;
                }
            };
            if updates.is_empty() {
                debug!(%channel, "transform produced no update");
            }

            for update in updates {
                if !store.try_accept(update.channel, &update.value) {
                    debug!(
                        channel = %update.channel,
                        value = %update.value,
                        "unchanged, not publishing"
                    );
                    continue;
                }
                let topic = self.config.topic_for(update.channel);
                info!(
                    %topic,
                    channel = %update.channel,
                    value = %update.value,
                    "publishing device state"
                );
                if let Err(e) = bus.publish_retained(&topic, &update.value).await {
                    warn!(%topic, error = %e, "publish failed");
                }
                accepted.push(update);
            }
        }

        if !interested {
            debug!("no channel reacts to this event kind");
        }
        accepted
    }
}
