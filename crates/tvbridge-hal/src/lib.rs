//! `tvbridge-hal` – TV sessions
//!
//! Everything that talks to the television lives here, behind the
//! [`TvSession`] trait.
//!
//! # Modules
//!
//! - [`session`] – the [`TvSession`] trait consumed by the bridge.
//! - [`webos`] – [`WebOsSession`], an SSAP WebSocket client for LG webOS TVs.
//! - [`wol`] – Wake-on-LAN magic packets, the only way to power on a TV in
//!   standby.
//! - [`sim`] – [`SimTv`], an in-process simulator for tests and headless runs.

pub mod session;
pub mod sim;
pub mod webos;
pub mod wol;

pub use session::TvSession;
pub use sim::SimTv;
pub use webos::{WebOsConfig, WebOsSession};
pub use wol::MacAddress;
