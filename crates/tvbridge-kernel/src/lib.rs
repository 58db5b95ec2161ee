//! `tvbridge-kernel` – Synchronization core
//!
//! Decides which value goes where.  It does no I/O of its own: device events
//! arrive from a [`TvSession`][tvbridge_hal::TvSession], bus messages from a
//! [`MessageBus`][tvbridge_middleware::MessageBus], and both routers write
//! back through those same traits.
//!
//! # Modules
//!
//! - [`registry`] – [`ChannelRegistry`][registry::ChannelRegistry]: the
//!   static table of channels, their event transforms, command handlers and
//!   power gates, including the power cascade.
//! - [`config`] – [`BridgeConfig`][config::BridgeConfig]: registry plus bus
//!   namespace; maps channels to topics and back.
//! - [`state_store`] – [`StateStore`][state_store::StateStore]: last known
//!   value per channel and the dedup gate shared by both routers.
//! - [`event_router`] – [`EventRouter`][event_router::EventRouter]: device
//!   events → retained publishes.
//! - [`command_router`] – [`CommandRouter`][command_router::CommandRouter]:
//!   bus messages → TV commands, with echo suppression and gating.

pub mod command_router;
pub mod config;
pub mod event_router;
pub mod registry;
pub mod state_store;

pub use command_router::{CommandOutcome, CommandRouter};
pub use config::BridgeConfig;
pub use event_router::EventRouter;
pub use registry::{
    ChannelEntry, ChannelRegistry, ChannelUpdate, CommandHandler, Gate, Reaction, Transform,
};
pub use state_store::StateStore;
