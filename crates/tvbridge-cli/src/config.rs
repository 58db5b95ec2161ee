//! Configuration file – reads/writes `~/.tvbridge/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tvbridge_hal::{MacAddress, WebOsConfig};
use tvbridge_kernel::BridgeConfig;
use tvbridge_middleware::MqttConfig;
use tvbridge_types::BridgeError;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Printed when no configuration file exists.
pub const EXAMPLE_CONFIG: &str = r#"[mqtt]
host = "192.168.1.10"
port = 1883
username = "bridge"
password = "secret"
client_id = "tvbridge"
namespace = "home/livingroom/tv"

[tv]
ip = "192.168.1.20"
mac = "AA:BB:CC:DD:EE:FF"
# client_key = "..."   # issued by the TV on first pairing
name = "LG TV"
"#;

/// A string that is wiped from memory on drop and never shown in `Debug`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

/// Persisted configuration stored in `~/.tvbridge/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub mqtt: MqttSection,
    pub tv: TvSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSection {
    pub host: String,

    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Secret>,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Topic prefix; each channel lives at `{namespace}/{channel}`.
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvSection {
    pub ip: String,

    /// Needed to wake the TV from standby.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<Secret>,

    #[serde(default = "default_tv_name")]
    pub name: String,
}

fn default_mqtt_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "tvbridge".to_string()
}
fn default_tv_name() -> String {
    "LG TV".to_string()
}

impl Config {
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::standard(self.mqtt.namespace.clone())
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            username: self.mqtt.username.clone(),
            password: self.mqtt.password.as_ref().map(|p| p.expose().to_string()),
            keep_alive: Duration::from_secs(30),
        }
    }

    /// Fails when the configured MAC address cannot be parsed.
    pub fn webos_config(&self) -> Result<WebOsConfig, BridgeError> {
        let mut webos = WebOsConfig::new(self.tv.ip.clone());
        webos.mac = self.tv.mac.as_deref().map(MacAddress::parse).transpose()?;
        webos.client_key = self.tv.client_key.as_ref().map(|k| k.expose().to_string());
        Ok(webos)
    }
}

/// Return the path to `~/.tvbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".tvbridge").join("config.toml")
}

/// Load the config from `path`.  `Ok(None)` if the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        BridgeError::Config(format!("failed to read {}: {e}", path.display()))
    })?;
    let mut cfg = parse(&raw)?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

pub fn parse(raw: &str) -> Result<Config, BridgeError> {
    toml::from_str(raw).map_err(|e| BridgeError::Config(format!("failed to parse config: {e}")))
}

/// Apply `TVBRIDGE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TVBRIDGE_MQTT_HOST` | `mqtt.host` |
/// | `TVBRIDGE_MQTT_PORT` | `mqtt.port` (ignored unless a valid port) |
/// | `TVBRIDGE_NAMESPACE` | `mqtt.namespace` |
/// | `TVBRIDGE_TV_IP` | `tv.ip` |
/// | `TVBRIDGE_TV_MAC` | `tv.mac` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("TVBRIDGE_MQTT_HOST") {
        cfg.mqtt.host = v;
    }
    if let Ok(v) = std::env::var("TVBRIDGE_MQTT_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.mqtt.port = port;
    }
    if let Ok(v) = std::env::var("TVBRIDGE_NAMESPACE") {
        cfg.mqtt.namespace = v;
    }
    if let Ok(v) = std::env::var("TVBRIDGE_TV_IP") {
        cfg.tv.ip = v;
    }
    if let Ok(v) = std::env::var("TVBRIDGE_TV_MAC") {
        cfg.tv.mac = Some(v);
    }
}

/// Write `cfg` to `path`, owner-only on Unix.
pub fn save_to(cfg: &Config, path: &Path) -> Result<(), BridgeError> {
    let io_err = |what: &str, e: std::io::Error| BridgeError::Config(format!("{what}: {e}"));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err("failed to create config directory", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| io_err("failed to restrict config directory", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| BridgeError::Config(format!("failed to serialize config: {e}")))?;

    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| io_err(&format!("failed to write {}", path.display()), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| io_err(&format!("failed to write {}", path.display()), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[mqtt]
host = "broker.local"
namespace = "tv"

[tv]
ip = "10.0.0.5"
"#;

    #[test]
    fn example_config_parses() {
        let cfg = parse(EXAMPLE_CONFIG).expect("example must parse");
        assert_eq!(cfg.mqtt.namespace, "home/livingroom/tv");
        assert_eq!(cfg.tv.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert!(cfg.tv.client_key.is_none());
    }

    #[test]
    fn defaults_fill_optional_keys() {
        let cfg = parse(MINIMAL).unwrap();
        assert_eq!(cfg.mqtt.port, 1883);
        assert_eq!(cfg.mqtt.client_id, "tvbridge");
        assert_eq!(cfg.tv.name, "LG TV");
        assert!(cfg.mqtt.username.is_none());
        assert!(cfg.tv.mac.is_none());
    }

    #[test]
    fn missing_required_key_is_a_config_error() {
        let err = parse("[mqtt]\nhost = \"x\"\n[tv]\nip = \"y\"\n").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
        assert!(err.to_string().contains("namespace"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut cfg = parse(MINIMAL).unwrap();
        cfg.mqtt.password = Some(Secret("mqtt-pass-123".into()));
        cfg.tv.client_key = Some(Secret("tv-key-456".into()));
        let shown = format!("{cfg:?}");
        assert!(!shown.contains("mqtt-pass-123"));
        assert!(!shown.contains("tv-key-456"));
        assert!(shown.contains("<redacted>"));
    }

    #[test]
    fn collaborator_configs_carry_settings() {
        let mut cfg = parse(EXAMPLE_CONFIG).unwrap();
        cfg.tv.client_key = Some(Secret("key".into()));

        let mqtt = cfg.mqtt_config();
        assert_eq!(mqtt.host, "192.168.1.10");
        assert_eq!(mqtt.password.as_deref(), Some("secret"));

        let webos = cfg.webos_config().unwrap();
        assert_eq!(webos.url(), "ws://192.168.1.20:3000");
        assert!(webos.mac.is_some());
        assert_eq!(webos.client_key.as_deref(), Some("key"));

        assert_eq!(
            cfg.bridge_config().topic_for(tvbridge_types::Channel::Power),
            "home/livingroom/tv/power"
        );
    }

    #[test]
    fn bad_mac_is_rejected() {
        let mut cfg = parse(MINIMAL).unwrap();
        cfg.tv.mac = Some("not-a-mac".to_string());
        assert!(matches!(cfg.webos_config(), Err(BridgeError::Config(_))));
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() -> Result<(), Box<dyn std::error::Error>> {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir()?;
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&parse(MINIMAL)?, &path)?;

        let file_mode = fs::metadata(&path)?.permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let dir_mode = fs::metadata(path.parent().unwrap())?.permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        Ok(())
    }

    #[test]
    fn save_then_load_keeps_secrets() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("config.toml");
        let mut cfg = parse(MINIMAL)?;
        cfg.mqtt.password = Some(Secret("pw".into()));

        save_to(&cfg, &path)?;
        let loaded = load_from(&path)?.expect("file exists");

        assert_eq!(loaded.mqtt.password.as_ref().map(Secret::expose), Some("pw"));
        assert_eq!(loaded.tv.ip, "10.0.0.5");
        Ok(())
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).unwrap().is_none());
    }

    #[test]
    fn config_path_points_to_tvbridge_dir() {
        let p = config_path_for_home("/home/someone");
        assert_eq!(p, PathBuf::from("/home/someone/.tvbridge/config.toml"));
    }

    #[test]
    fn env_overrides_apply_and_ignore_bad_ports() {
        // SAFETY: the only test in this crate touching these variables.
        unsafe {
            std::env::set_var("TVBRIDGE_NAMESPACE", "den/tv");
            std::env::set_var("TVBRIDGE_TV_MAC", "01:02:03:04:05:06");
            std::env::set_var("TVBRIDGE_MQTT_PORT", "not-a-port");
        }
        let mut cfg = parse(MINIMAL).unwrap();
        apply_env_overrides(&mut cfg);
        unsafe {
            std::env::remove_var("TVBRIDGE_NAMESPACE");
            std::env::remove_var("TVBRIDGE_TV_MAC");
            std::env::remove_var("TVBRIDGE_MQTT_PORT");
        }

        assert_eq!(cfg.mqtt.namespace, "den/tv");
        assert_eq!(cfg.tv.mac.as_deref(), Some("01:02:03:04:05:06"));
        assert_eq!(cfg.mqtt.port, 1883);
    }
}
