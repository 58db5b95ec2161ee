//! `tvbridge-middleware` – Bus plumbing
//!
//! Moves string values between the bridge and a publish/subscribe bus
//! without caring about their meaning.
//!
//! # Modules
//!
//! - [`bus`] – the [`MessageBus`] trait consumed by the bridge, plus
//!   [`LocalBus`], an in-process implementation with retained values built on
//!   Tokio broadcast channels.
//! - [`mqtt`] – [`MqttBus`], the `rumqttc`-backed transport used in
//!   production.

pub mod bus;
pub mod mqtt;

pub use bus::{LocalBus, MessageBus, TopicSubscriber, broadcast_stream};
pub use mqtt::{MqttBus, MqttConfig};
