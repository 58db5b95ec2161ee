use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A named synchronization point between one bus topic and the TV.
///
/// The lowercase name doubles as the bus topic suffix
/// (`{namespace}/{name}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Power,
    Volume,
    Backlight,
    Screen,
    Input,
}

impl Channel {
    /// Every channel, in registry order.
    pub const ALL: [Channel; 5] = [
        Channel::Power,
        Channel::Volume,
        Channel::Backlight,
        Channel::Screen,
        Channel::Input,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Power => "power",
            Channel::Volume => "volume",
            Channel::Backlight => "backlight",
            Channel::Screen => "screen",
            Channel::Input => "input",
        }
    }

    /// Resolve a topic suffix to a channel.  Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Channel> {
        Channel::ALL.into_iter().find(|c| c.as_str() == name)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of events a TV session emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PowerOn,
    PowerOff,
    /// Payload: `{"volume": 0..=100}`.
    AudioStatusChanged,
    /// Payload: `{"backlight": n}` where `n` is a number or numeric string.
    PictureSettingsChanged,
    /// Payload: `{"state": "...", "processing": "..."}`.
    ScreenStateChanged,
    /// Payload: `{"appId": "..."}`.
    ForegroundAppChanged,
    /// The session finished registering and subscribing.
    SetupComplete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::PowerOn => "power_on",
            EventKind::PowerOff => "power_off",
            EventKind::AudioStatusChanged => "audio_status_changed",
            EventKind::PictureSettingsChanged => "picture_settings_changed",
            EventKind::ScreenStateChanged => "screen_state_changed",
            EventKind::ForegroundAppChanged => "foreground_app_changed",
            EventKind::SetupComplete => "setup_complete",
        };
        f.write_str(name)
    }
}

/// Event wrapper produced by a TV session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    /// Raw payload as reported by the session; shape depends on `kind`.
    pub payload: serde_json::Value,
}

impl DeviceEvent {
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            payload,
        }
    }

    /// An event that carries no payload (power transitions, setup).
    pub fn bare(kind: EventKind) -> Self {
        Self::new(kind, serde_json::Value::Null)
    }
}

/// Commands the bridge may issue against a TV session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "payload")]
pub enum TvCommand {
    PowerOn,
    PowerOff,
    SetVolume(u8),
    SetBacklight(u8),
    ScreenOn,
    ScreenOff,
    LaunchApp(String),
}

/// A message delivered by the bus transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// Payload decoded as UTF-8.
    pub fn payload_str(&self) -> Result<&str, BridgeError> {
        std::str::from_utf8(&self.payload).map_err(|e| {
            BridgeError::Bus(format!("non UTF-8 payload on {}: {e}", self.topic))
        })
    }
}

/// Error type shared by every crate in the workspace.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Malformed {kind} payload: {details}")]
    MalformedPayload { kind: EventKind, details: String },

    #[error("Invalid value {value:?} for channel {channel}: {reason}")]
    InvalidValue {
        channel: Channel,
        value: String,
        reason: String,
    },

    #[error("TV Session Error: {0}")]
    Session(String),

    #[error("Bus Error: {0}")]
    Bus(String),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Bridge Task Error: {0}")]
    Task(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_resolve_back_to_channels() {
        for channel in Channel::ALL {
            assert_eq!(Channel::from_name(channel.as_str()), Some(channel));
        }
    }

    #[test]
    fn unknown_channel_name_yields_none() {
        assert_eq!(Channel::from_name("brightness"), None);
        assert_eq!(Channel::from_name("Power"), None);
        assert_eq!(Channel::from_name(""), None);
    }

    #[test]
    fn channel_serializes_as_topic_suffix() {
        let json = serde_json::to_string(&Channel::Backlight).unwrap();
        assert_eq!(json, "\"backlight\"");
    }

    #[test]
    fn tv_command_serialization_is_tagged() {
        let json = serde_json::to_string(&TvCommand::SetVolume(12)).unwrap();
        assert!(json.contains("\"command\":\"SetVolume\""));
        let back: TvCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TvCommand::SetVolume(12));
    }

    #[test]
    fn bare_event_has_null_payload() {
        let event = DeviceEvent::bare(EventKind::PowerOff);
        assert_eq!(event.kind, EventKind::PowerOff);
        assert!(event.payload.is_null());
    }

    #[test]
    fn bus_message_rejects_invalid_utf8() {
        let msg = BusMessage::new("tv/volume", vec![0xff, 0xfe]);
        assert!(matches!(msg.payload_str(), Err(BridgeError::Bus(_))));

        let ok = BusMessage::new("tv/volume", "42");
        assert_eq!(ok.payload_str().unwrap(), "42");
    }

    #[test]
    fn bridge_error_display() {
        let err = BridgeError::InvalidValue {
            channel: Channel::Volume,
            value: "loud".to_string(),
            reason: "not an integer".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("volume"));
        assert!(text.contains("loud"));

        let err = BridgeError::MalformedPayload {
            kind: EventKind::AudioStatusChanged,
            details: "missing volume".to_string(),
        };
        assert!(err.to_string().contains("audio_status_changed"));
    }
}
