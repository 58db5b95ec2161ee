//! In-process simulated TV for tests and `--simulate` runs.
//!
//! [`SimTv`] records every command it receives and, unless echo is disabled,
//! answers each command with the device event a real TV would emit once the
//! change took effect.  That makes it possible to exercise both directions of
//! the bridge, including echo suppression, without a TV on the network.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::debug;
use tvbridge_middleware::broadcast_stream;
use tvbridge_types::{BridgeError, DeviceEvent, EventKind, TvCommand};

use crate::session::TvSession;

const EVENT_CAPACITY: usize = 64;

/// Simulated TV.  Always succeeds.
pub struct SimTv {
    powered: AtomicBool,
    echo: bool,
    inputs: Vec<String>,
    commands: Mutex<Vec<TvCommand>>,
    events: broadcast::Sender<DeviceEvent>,
}

impl SimTv {
    /// A powered-off TV with two HDMI inputs that echoes commands as events.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            powered: AtomicBool::new(false),
            echo: true,
            inputs: vec![
                "com.webos.app.hdmi1".to_string(),
                "com.webos.app.hdmi2".to_string(),
            ],
            commands: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn powered_on(self, on: bool) -> Self {
        self.powered.store(on, Ordering::SeqCst);
        self
    }

    /// Stop answering commands with events.
    pub fn without_echo(mut self) -> Self {
        self.echo = false;
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<String>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Push an event to every observer, as if the TV had reported it.
    ///
    /// Power events also update the simulated power state.
    pub fn emit(&self, event: DeviceEvent) -> usize {
        match event.kind {
            EventKind::PowerOn => self.powered.store(true, Ordering::SeqCst),
            EventKind::PowerOff => self.powered.store(false, Ordering::SeqCst),
            _ => {}
        }
        self.events.send(event).unwrap_or(0)
    }

    /// Commands received so far, oldest first.
    pub fn commands(&self) -> Vec<TvCommand> {
        self.command_log().clone()
    }

    pub fn clear_commands(&self) {
        self.command_log().clear();
    }

    fn command_log(&self) -> std::sync::MutexGuard<'_, Vec<TvCommand>> {
        self.commands.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, command: TvCommand) {
        debug!(?command, "sim tv received command");
        let echoed = self.echo.then(|| Self::echo_for(&command));
        self.command_log().push(command);
        if let Some(event) = echoed {
            self.emit(event);
        }
    }

    fn echo_for(command: &TvCommand) -> DeviceEvent {
        match command {
            TvCommand::PowerOn => DeviceEvent::bare(EventKind::PowerOn),
            TvCommand::PowerOff => DeviceEvent::bare(EventKind::PowerOff),
            TvCommand::SetVolume(level) => {
                DeviceEvent::new(EventKind::AudioStatusChanged, json!({ "volume": level }))
            }
            TvCommand::SetBacklight(level) => DeviceEvent::new(
                EventKind::PictureSettingsChanged,
                json!({ "backlight": level }),
            ),
            TvCommand::ScreenOn => {
                DeviceEvent::new(EventKind::ScreenStateChanged, json!({ "state": "Screen On" }))
            }
            TvCommand::ScreenOff => {
                DeviceEvent::new(EventKind::ScreenStateChanged, json!({ "state": "Screen Off" }))
            }
            TvCommand::LaunchApp(app_id) => {
                DeviceEvent::new(EventKind::ForegroundAppChanged, json!({ "appId": app_id }))
            }
        }
    }
}

impl Default for SimTv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TvSession for SimTv {
    fn events(&self) -> BoxStream<'static, DeviceEvent> {
        broadcast_stream(self.events.subscribe(), "sim-tv")
    }

    fn is_powered_on(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    async fn power_on(&self) -> Result<(), BridgeError> {
        self.record(TvCommand::PowerOn);
        Ok(())
    }

    async fn power_off(&self) -> Result<(), BridgeError> {
        self.record(TvCommand::PowerOff);
        Ok(())
    }

    async fn set_volume(&self, level: u8) -> Result<(), BridgeError> {
        self.record(TvCommand::SetVolume(level));
        Ok(())
    }

    async fn set_backlight(&self, level: u8) -> Result<(), BridgeError> {
        self.record(TvCommand::SetBacklight(level));
        Ok(())
    }

    async fn screen_on(&self) -> Result<(), BridgeError> {
        self.record(TvCommand::ScreenOn);
        Ok(())
    }

    async fn screen_off(&self) -> Result<(), BridgeError> {
        self.record(TvCommand::ScreenOff);
        Ok(())
    }

    async fn launch_app(&self, app_id: &str) -> Result<(), BridgeError> {
        self.record(TvCommand::LaunchApp(app_id.to_string()));
        Ok(())
    }

    async fn list_external_inputs(&self) -> Result<Vec<String>, BridgeError> {
        Ok(self.inputs.clone())
    }
}
