//! `tvbridge-runtime` – Process wiring
//!
//! Runs the synchronization core against real (or simulated) collaborators.
//!
//! # Modules
//!
//! - [`bridge`] – [`Bridge`][bridge::Bridge]: owns the
//!   [`StateStore`][tvbridge_kernel::StateStore] and both routers, and
//!   multiplexes device events, bus messages and shutdown in a single
//!   `tokio::select!` loop.  [`Bridge::spawn`][bridge::Bridge::spawn] returns
//!   a [`BridgeHandle`][bridge::BridgeHandle] for clean shutdown.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber (compact or JSON) with an optional OTLP span
//!   exporter enabled by `OTEL_EXPORTER_OTLP_ENDPOINT`.

pub mod bridge;
pub mod telemetry;

pub use bridge::{Bridge, BridgeHandle};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
