//! The `TvSession` trait: everything the bridge consumes from a TV.
//!
//! Sessions own their connection, pairing and wire protocol.  The bridge only
//! ever talks to the trait, so a real TV and the simulator are
//! interchangeable.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tvbridge_types::{BridgeError, DeviceEvent, TvCommand};

/// A stateful session with one TV.
///
/// Command methods are fire-and-forget: implementations queue the request
/// and return without waiting for the TV to act on it.  Retries and timeouts
/// belong to the implementation.
#[async_trait]
pub trait TvSession: Send + Sync {
    /// Register an observer for device events.  Dropping the returned stream
    /// cancels the registration.
    fn events(&self) -> BoxStream<'static, DeviceEvent>;

    /// Whether the TV currently reports itself as powered on.
    fn is_powered_on(&self) -> bool;

    async fn power_on(&self) -> Result<(), BridgeError>;

    async fn power_off(&self) -> Result<(), BridgeError>;

    /// Set the speaker volume, `0..=100`.
    async fn set_volume(&self, level: u8) -> Result<(), BridgeError>;

    async fn set_backlight(&self, level: u8) -> Result<(), BridgeError>;

    async fn screen_on(&self) -> Result<(), BridgeError>;

    async fn screen_off(&self) -> Result<(), BridgeError>;

    /// Bring the application (or external input) with `app_id` to the
    /// foreground.
    async fn launch_app(&self, app_id: &str) -> Result<(), BridgeError>;

    /// Identifiers of the external inputs, usable as `launch_app` targets.
    async fn list_external_inputs(&self) -> Result<Vec<String>, BridgeError>;

    /// Dispatch a [`TvCommand`] to the matching method.
    async fn execute(&self, command: &TvCommand) -> Result<(), BridgeError> {
        match command {
            TvCommand::PowerOn => self.power_on().await,
            TvCommand::PowerOff => self.power_off().await,
            TvCommand::SetVolume(level) => self.set_volume(*level).await,
            TvCommand::SetBacklight(level) => self.set_backlight(*level).await,
            TvCommand::ScreenOn => self.screen_on().await,
            TvCommand::ScreenOff => self.screen_off().await,
            TvCommand::LaunchApp(app_id) => self.launch_app(app_id).await,
        }
    }
}
