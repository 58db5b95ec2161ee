//! [`ChannelRegistry`] – the static table of synchronized channels.
//!
//! Each [`ChannelEntry`] declares, for one channel:
//!
//! - the device-event kinds it reacts to, each with a [`Transform`] that turns
//!   the raw event payload into zero or more [`ChannelUpdate`]s;
//! - an optional [`CommandHandler`] that turns an inbound bus value into
//!   [`TvCommand`]s;
//! - the [`Gate`] that must hold before those commands are forwarded.
//!
//! | Channel | Reacts to | Command | Gate |
//! |---|---|---|---|
//! | `power` | `PowerOn`, `PowerOff` | `on` / `off` | none |
//! | `volume` | `AudioStatusChanged` | `0..=100` | powered on |
//! | `backlight` | `PictureSettingsChanged` | `0..=100` | powered on |
//! | `screen` | `ScreenStateChanged` | `on` / `off` | powered on |
//! | `input` | `ForegroundAppChanged` | app id | powered on |
//!
//! # Power cascade
//!
//! The `power` transforms do more than report power.  Power-off resets the
//! channels that are meaningless while the TV is off, in this order:
//! `power=off`, `backlight=0`, `volume=0`, `screen=off`.  Power-on reports
//! `power=on` then `screen=on`.  Each update still passes the dedup gate on
//! its own.
//!
//! Lookups are pure.  Unknown event kinds or channels yield empty results.

use std::fmt;

use serde_json::Value;
use tvbridge_types::{BridgeError, Channel, EventKind, TvCommand};

/// A value derived for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelUpdate {
    pub channel: Channel,
    pub value: String,
}

impl ChannelUpdate {
    pub fn new(channel: Channel, value: impl Into<String>) -> Self {
        Self {
            channel,
            value: value.into(),
        }
    }
}

impl fmt::Display for ChannelUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.channel, self.value)
    }
}

/// Event payload → updates.  An empty vector means "no update"; an error
/// means the payload did not have the expected shape.
pub type Transform = fn(&Value) -> Result<Vec<ChannelUpdate>, BridgeError>;

/// Inbound bus value → device commands.
pub type CommandHandler = fn(&str) -> Result<Vec<TvCommand>, BridgeError>;

/// Condition that must hold before a channel's commands reach the TV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Open,
    PoweredOn,
}

/// One event kind a channel reacts to.
pub struct Reaction {
    pub kind: EventKind,
    pub transform: Transform,
}

/// Declaration of one synchronized channel.
pub struct ChannelEntry {
    pub channel: Channel,
    pub reactions: &'static [Reaction],
    pub command: Option<CommandHandler>,
    pub gate: Gate,
}

/// Immutable, ordered set of [`ChannelEntry`]s.
#[derive(Clone, Copy)]
pub struct ChannelRegistry {
    entries: &'static [ChannelEntry],
}

impl ChannelRegistry {
    /// The registry for LG webOS TVs.
    pub const fn standard() -> Self {
        Self { entries: STANDARD }
    }

    /// A registry over a custom table.
    pub const fn from_entries(entries: &'static [ChannelEntry]) -> Self {
        Self { entries }
    }

    /// Registered channels, in declaration order.
    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.entries.iter().map(|e| e.channel)
    }

    /// Channels interested in `kind`, in declaration order, each paired with
    /// its transform.
    pub fn for_event(&self, kind: EventKind) -> impl Iterator<Item = (Channel, Transform)> + '_ {
        self.entries.iter().flat_map(move |entry| {
            entry
                .reactions
                .iter()
                .filter(move |r| r.kind == kind)
                .map(move |r| (entry.channel, r.transform))
        })
    }

    pub fn entry(&self, channel: Channel) -> Option<&ChannelEntry> {
        self.entries.iter().find(|e| e.channel == channel)
    }

    /// Resolve a topic suffix to a registered channel.
    pub fn resolve(&self, name: &str) -> Option<Channel> {
        Channel::from_name(name).filter(|c| self.entry(*c).is_some())
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.channels()).finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Standard table
// ────────────────────────────────────────────────────────────────────────────

static STANDARD: &[ChannelEntry] = &[
    ChannelEntry {
        channel: Channel::Power,
        reactions: &[
            Reaction {
                kind: EventKind::PowerOn,
                transform: power_on_updates,
            },
            Reaction {
                kind: EventKind::PowerOff,
                transform: power_off_updates,
            },
        ],
        command: Some(power_command),
        gate: Gate::Open,
    },
    ChannelEntry {
        channel: Channel::Volume,
        reactions: &[Reaction {
            kind: EventKind::AudioStatusChanged,
            transform: volume_update,
        }],
        command: Some(volume_command),
        gate: Gate::PoweredOn,
    },
    ChannelEntry {
        channel: Channel::Backlight,
        reactions: &[Reaction {
            kind: EventKind::PictureSettingsChanged,
            transform: backlight_update,
        }],
        command: Some(backlight_command),
        gate: Gate::PoweredOn,
    },
    ChannelEntry {
        channel: Channel::Screen,
        reactions: &[Reaction {
            kind: EventKind::ScreenStateChanged,
            transform: screen_update,
        }],
        command: Some(screen_command),
        gate: Gate::PoweredOn,
    },
    ChannelEntry {
        channel: Channel::Input,
        reactions: &[Reaction {
            kind: EventKind::ForegroundAppChanged,
            transform: input_update,
        }],
        command: Some(input_command),
        gate: Gate::PoweredOn,
    },
];

// ── Transforms ──────────────────────────────────────────────────────────────

fn power_on_updates(_: &Value) -> Result<Vec<ChannelUpdate>, BridgeError> {
    Ok(vec![
        ChannelUpdate::new(Channel::Power, "on"),
        ChannelUpdate::new(Channel::Screen, "on"),
    ])
}

fn power_off_updates(_: &Value) -> Result<Vec<ChannelUpdate>, BridgeError> {
    Ok(vec![
        ChannelUpdate::new(Channel::Power, "off"),
        ChannelUpdate::new(Channel::Backlight, "0"),
        ChannelUpdate::new(Channel::Volume, "0"),
        ChannelUpdate::new(Channel::Screen, "off"),
    ])
}

fn volume_update(payload: &Value) -> Result<Vec<ChannelUpdate>, BridgeError> {
    let level = integer_field(payload, "volume", EventKind::AudioStatusChanged)?;
    Ok(vec![ChannelUpdate::new(Channel::Volume, level.to_string())])
}

fn backlight_update(payload: &Value) -> Result<Vec<ChannelUpdate>, BridgeError> {
    let level = integer_field(payload, "backlight", EventKind::PictureSettingsChanged)?;
    Ok(vec![ChannelUpdate::new(Channel::Backlight, level.to_string())])
}

fn screen_update(payload: &Value) -> Result<Vec<ChannelUpdate>, BridgeError> {
    if !payload.is_object() {
        return Err(BridgeError::MalformedPayload {
            kind: EventKind::ScreenStateChanged,
            details: format!("expected an object, got {payload}"),
        });
    }
    let state = payload.get("state").and_then(Value::as_str);
    let processing = payload.get("processing").and_then(Value::as_str);

    let value = if state == Some("Screen On") || processing == Some("Screen On") {
        "on"
    } else if state == Some("Screen Off") {
        "off"
    } else {
        return Ok(Vec::new());
    };
    Ok(vec![ChannelUpdate::new(Channel::Screen, value)])
}

fn input_update(payload: &Value) -> Result<Vec<ChannelUpdate>, BridgeError> {
    let app_id = payload
        .get("appId")
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::MalformedPayload {
            kind: EventKind::ForegroundAppChanged,
            details: format!("missing string field `appId` in {payload}"),
        })?;
    // Only external inputs are tracked; regular apps are not inputs.
    if app_id.contains("hdmi") {
        Ok(vec![ChannelUpdate::new(Channel::Input, app_id)])
    } else {
        Ok(Vec::new())
    }
}

/// Read an integer that the TV may report either as a JSON number or as a
/// numeric string.
fn integer_field(payload: &Value, field: &str, kind: EventKind) -> Result<i64, BridgeError> {
    let malformed = |details: String| BridgeError::MalformedPayload { kind, details };
    match payload.get(field) {
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| malformed(format!("`{field}` is not an integer: {n}"))),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| malformed(format!("`{field}` is not numeric: {s:?}"))),
        Some(other) => Err(malformed(format!("`{field}` has unexpected type: {other}"))),
        None => Err(malformed(format!("missing field `{field}` in {payload}"))),
    }
}

// ── Command handlers ────────────────────────────────────────────────────────

fn power_command(value: &str) -> Result<Vec<TvCommand>, BridgeError> {
    Ok(match value.trim() {
        "on" => vec![TvCommand::PowerOn],
        "off" => vec![TvCommand::PowerOff],
        _ => Vec::new(),
    })
}

fn volume_command(value: &str) -> Result<Vec<TvCommand>, BridgeError> {
    Ok(vec![TvCommand::SetVolume(percent(Channel::Volume, value)?)])
}

fn backlight_command(value: &str) -> Result<Vec<TvCommand>, BridgeError> {
    Ok(vec![TvCommand::SetBacklight(percent(Channel::Backlight, value)?)])
}

fn screen_command(value: &str) -> Result<Vec<TvCommand>, BridgeError> {
    Ok(match value.trim() {
        "on" => vec![TvCommand::ScreenOn],
        "off" => vec![TvCommand::ScreenOff],
        _ => Vec::new(),
    })
}

fn input_command(value: &str) -> Result<Vec<TvCommand>, BridgeError> {
    let app_id = value.trim();
    if app_id.is_empty() {
        return Err(BridgeError::InvalidValue {
            channel: Channel::Input,
            value: value.to_string(),
            reason: "empty app id".to_string(),
        });
    }
    Ok(vec![TvCommand::LaunchApp(app_id.to_string())])
}

fn percent(channel: Channel, value: &str) -> Result<u8, BridgeError> {
    let invalid = |reason: &str| BridgeError::InvalidValue {
        channel,
        value: value.to_string(),
        reason: reason.to_string(),
    };
    let level: u8 = value.trim().parse().map_err(|_| invalid("not an integer in 0..=100"))?;
    if level > 100 {
        return Err(invalid("above 100"));
    }
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ChannelRegistry {
        ChannelRegistry::standard()
    }

    fn single(transform: Transform, payload: Value) -> Vec<String> {
        transform(&payload)
            .expect("transform must succeed")
            .into_iter()
            .map(|u| u.to_string())
            .collect()
    }

    #[test]
    fn channels_are_declared_in_order() {
        let channels: Vec<Channel> = registry().channels().collect();
        assert_eq!(channels, Channel::ALL.to_vec());
    }

    #[test]
    fn for_event_resolves_interested_channels() {
        let reg = registry();
        let power_off: Vec<Channel> = reg.for_event(EventKind::PowerOff).map(|(c, _)| c).collect();
        assert_eq!(power_off, vec![Channel::Power]);

        let audio: Vec<Channel> = reg
            .for_event(EventKind::AudioStatusChanged)
            .map(|(c, _)| c)
            .collect();
        assert_eq!(audio, vec![Channel::Volume]);
    }

    #[test]
    fn unknown_lookups_are_empty_not_errors() {
        let reg = registry();
        assert_eq!(reg.for_event(EventKind::SetupComplete).count(), 0);
        assert!(reg.resolve("brightness").is_none());
        assert!(reg.resolve("").is_none());
        assert_eq!(reg.resolve("volume"), Some(Channel::Volume));
    }

    #[test]
    fn custom_registry_only_resolves_its_own_channels() {
        static ONLY_POWER: &[ChannelEntry] = &[ChannelEntry {
            channel: Channel::Power,
            reactions: &[],
            command: Some(power_command),
            gate: Gate::Open,
        }];
        let reg = ChannelRegistry::from_entries(ONLY_POWER);
        assert_eq!(reg.resolve("power"), Some(Channel::Power));
        assert!(reg.resolve("volume").is_none());
        assert_eq!(reg.for_event(EventKind::PowerOn).count(), 0);
    }

    #[test]
    fn gates_protect_everything_but_power() {
        let reg = registry();
        for channel in Channel::ALL {
            let gate = reg.entry(channel).expect("registered").gate;
            if channel == Channel::Power {
                assert_eq!(gate, Gate::Open);
            } else {
                assert_eq!(gate, Gate::PoweredOn, "{channel} must be gated");
            }
        }
    }

    #[test]
    fn power_off_cascade_order() {
        assert_eq!(
            single(power_off_updates, Value::Null),
            vec!["power=off", "backlight=0", "volume=0", "screen=off"]
        );
        assert_eq!(single(power_on_updates, Value::Null), vec!["power=on", "screen=on"]);
    }

    #[test]
    fn volume_transform_accepts_numbers_and_numeric_strings() {
        assert_eq!(single(volume_update, json!({ "volume": 9 })), vec!["volume=9"]);
        assert_eq!(single(volume_update, json!({ "volume": " 12 " })), vec!["volume=12"]);
    }

    #[test]
    fn volume_transform_rejects_malformed_payloads() {
        for payload in [
            json!({}),
            json!({ "volume": "loud" }),
            json!({ "volume": 1.5 }),
            json!(null),
        ] {
            assert!(
                matches!(volume_update(&payload), Err(BridgeError::MalformedPayload { .. })),
                "{payload} must be malformed"
            );
        }
    }

    #[test]
    fn backlight_transform_reads_string_settings() {
        assert_eq!(
            single(backlight_update, json!({ "backlight": "65" })),
            vec!["backlight=65"]
        );
    }

    #[test]
    fn screen_transform_maps_known_states() {
        assert_eq!(single(screen_update, json!({ "state": "Screen On" })), vec!["screen=on"]);
        assert_eq!(
            single(screen_update, json!({ "state": "Active", "processing": "Screen On" })),
            vec!["screen=on"]
        );
        assert_eq!(single(screen_update, json!({ "state": "Screen Off" })), vec!["screen=off"]);
        assert!(single(screen_update, json!({ "state": "Active" })).is_empty());
        assert!(screen_update(&json!("Screen On")).is_err());
    }

    #[test]
    fn input_transform_only_tracks_hdmi() {
        assert_eq!(
            single(input_update, json!({ "appId": "com.webos.app.hdmi2" })),
            vec!["input=com.webos.app.hdmi2"]
        );
        assert!(single(input_update, json!({ "appId": "netflix" })).is_empty());
        assert!(input_update(&json!({ "app": "x" })).is_err());
    }

    #[test]
    fn power_command_ignores_unknown_values() {
        assert_eq!(power_command("on").unwrap(), vec![TvCommand::PowerOn]);
        assert_eq!(power_command("off\n").unwrap(), vec![TvCommand::PowerOff]);
        assert!(power_command("toggle").unwrap().is_empty());
    }

    #[test]
    fn percent_commands_validate_range() {
        assert_eq!(volume_command("50").unwrap(), vec![TvCommand::SetVolume(50)]);
        assert_eq!(backlight_command("100").unwrap(), vec![TvCommand::SetBacklight(100)]);
        assert!(matches!(volume_command("101"), Err(BridgeError::InvalidValue { .. })));
        assert!(matches!(volume_command("-1"), Err(BridgeError::InvalidValue { .. })));
        assert!(matches!(backlight_command("bright"), Err(BridgeError::InvalidValue { .. })));
    }

    #[test]
    fn screen_and_input_commands() {
        assert_eq!(screen_command("on").unwrap(), vec![TvCommand::ScreenOn]);
        assert_eq!(screen_command("off").unwrap(), vec![TvCommand::ScreenOff]);
        assert!(screen_command("dim").unwrap().is_empty());
        assert_eq!(
            input_command("com.webos.app.hdmi1").unwrap(),
            vec![TvCommand::LaunchApp("com.webos.app.hdmi1".to_string())]
        );
        assert!(input_command("  ").is_err());
    }
}
