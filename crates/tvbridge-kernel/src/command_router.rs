//! [`CommandRouter`] – inbound bus values → TV commands.
//!
//! Per message:
//!
//! 1. strip the namespace and resolve the channel (unknown → dropped);
//! 2. run the dedup gate (unchanged → dropped, which is what suppresses the
//!    echo of our own retained publishes);
//! 3. evaluate the channel's [`Gate`] (failing → dropped at debug level);
//! 4. run the command handler and execute each resulting command.
//!
//! The store is updated at step 2 even when step 3 drops the command, so a
//! value set while the TV is off is not replayed on power-on.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use tvbridge_hal::TvSession;
use tvbridge_types::{BusMessage, TvCommand};

use crate::config::BridgeConfig;
use crate::registry::Gate;
use crate::state_store::StateStore;

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Unknown topic, unregistered channel, or non-UTF-8 payload.
    Unroutable,
    /// Same value as the store already holds.
    Duplicate,
    /// The channel's gate did not hold.
    Gated,
    /// The handler refused the value.
    Rejected,
    /// Commands handed to the session, in order.  May be empty when the
    /// handler maps the value to nothing.
    Dispatched(Vec<TvCommand>),
}

pub struct CommandRouter {
    config: Arc<BridgeConfig>,
}

impl CommandRouter {
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        Self { config }
    }

    #[instrument(skip_all, fields(topic = %message.topic))]
    pub async fn route(
        &self,
        message: &BusMessage,
        store: &mut StateStore,
        session: &dyn TvSession,
    ) -> CommandOutcome {
        let Some(channel) = self.config.channel_for_topic(&message.topic) else {
            warn!("no channel for topic");
            return CommandOutcome::Unroutable;
        };
        let Some(entry) = self.config.registry().entry(channel) else {
            return CommandOutcome::Unroutable;
        };
        let value = match message.payload_str() {
            Ok(value) => value,
            Err(e) => {
                warn!(%channel, error = %e, "dropping message");
                return CommandOutcome::Unroutable;
            }
        };

        info!(%channel, %value, current = ?store.get(channel), "bus message received");

        if !store.try_accept(channel, value) {
            debug!(%channel, %value, "unchanged, ignoring");
            return CommandOutcome::Duplicate;
        }

        if entry.gate == Gate::PoweredOn && !session.is_powered_on() {
            debug!(%channel, %value, "tv is off, command suppressed");
            return CommandOutcome::Gated;
        }

        let Some(handler) = entry.command else {
            debug!(%channel, "channel is read-only");
            return CommandOutcome::Dispatched(Vec::new());
        };
        let commands = match handler(value) {
            Ok(commands) => commands,
            Err(e) => {
                warn!(%channel, error = %e, "rejecting bus value");
                return CommandOutcome::Rejected;
            }
        };

        for command in &commands {
            debug!(%channel, ?command, "executing");
            if let Err(e) = session.execute(command).await {
                warn!(%channel, ?command, error = %e, "tv command failed");
            }
        }
        CommandOutcome::Dispatched(commands)
    }
}
