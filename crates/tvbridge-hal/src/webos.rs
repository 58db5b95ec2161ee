//! LG webOS session over the SSAP WebSocket protocol.
//!
//! [`WebOsSession`] keeps one connection to `ws://{ip}:3000` alive in a
//! background task:
//!
//! 1. **Register** – sends the `register` handshake with the configured
//!    client key.  Without a key the TV shows a pairing prompt; the key it
//!    issues is logged so the operator can copy it into the config file.
//! 2. **Subscribe** – volume, picture backlight, power state and foreground
//!    app.  Every subscription update is translated into a [`DeviceEvent`].
//! 3. **Serve requests** – commands are queued on an mpsc channel and written
//!    to the socket in order.  Replies are matched back by request id.
//!
//! Power state is unknown until the power subscription first reports it;
//! registering alone does not mean the screen is on, since a TV in active
//! standby still answers on the socket.  When the socket closes or cannot be
//! opened the session reports the TV as powered off and reconnects with
//! exponential backoff.  Power-on is a Wake-on-LAN packet,
//! since a TV in standby has no socket to talk to.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use tvbridge_middleware::broadcast_stream;
use tvbridge_types::{BridgeError, DeviceEvent, EventKind};

use crate::session::TvSession;
use crate::wol::{self, MacAddress};

const DEFAULT_PORT: u16 = 3000;
const EVENT_CAPACITY: usize = 64;
const REQUEST_CAPACITY: usize = 32;
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

const REGISTER_ID: &str = "register_0";

/// Permissions requested in the registration manifest.
const PERMISSIONS: &[&str] = &[
    "LAUNCH",
    "CONTROL_AUDIO",
    "CONTROL_POWER",
    "CONTROL_DISPLAY",
    "CONTROL_TV_SCREEN",
    "READ_INSTALLED_APPS",
    "READ_INPUT_DEVICE_LIST",
    "READ_RUNNING_APPS",
    "READ_POWER_STATE",
    "READ_SETTINGS",
    "WRITE_SETTINGS",
];

/// Connection parameters for [`WebOsSession`].
#[derive(Clone)]
pub struct WebOsConfig {
    pub ip: String,
    pub port: u16,
    /// Required for power-on.
    pub mac: Option<MacAddress>,
    /// Key issued by the TV on a previous pairing.
    pub client_key: Option<String>,
}

impl WebOsConfig {
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port: DEFAULT_PORT,
            mac: None,
            client_key: None,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.ip, self.port)
    }
}

impl std::fmt::Debug for WebOsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebOsConfig")
            .field("ip", &self.ip)
            .field("port", &self.port)
            .field("mac", &self.mac)
            .field(
                "client_key",
                if self.client_key.is_some() { &"<redacted>" } else { &"<not set>" },
            )
            .finish()
    }
}

/// SSAP subscriptions opened after registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subscription {
    Volume,
    Picture,
    Power,
    ForegroundApp,
}

impl Subscription {
    const ALL: [Subscription; 4] = [
        Subscription::Volume,
        Subscription::Picture,
        Subscription::Power,
        Subscription::ForegroundApp,
    ];

    fn id(self) -> &'static str {
        match self {
            Subscription::Volume => "sub_volume",
            Subscription::Picture => "sub_picture",
            Subscription::Power => "sub_power",
            Subscription::ForegroundApp => "sub_foreground_app",
        }
    }

    fn from_id(id: &str) -> Option<Self> {
        Subscription::ALL.into_iter().find(|s| s.id() == id)
    }

    fn uri(self) -> &'static str {
        match self {
            Subscription::Volume => "ssap://audio/getVolume",
            Subscription::Picture => "ssap://settings/getSystemSettings",
            Subscription::Power => "ssap://com.webos.service.tvpower/power/getPowerState",
            Subscription::ForegroundApp => {
                "ssap://com.webos.applicationManager/getForegroundAppInfo"
            }
        }
    }

    fn payload(self) -> Value {
        match self {
            Subscription::Picture => json!({ "category": "picture", "keys": ["backlight"] }),
            _ => json!({}),
        }
    }
}

/// Last power state reported by the TV, shared between the session handle
/// and its connection task.  Starts unknown.
#[derive(Debug, Default)]
struct PowerState(AtomicU8);

impl PowerState {
    const UNKNOWN: u8 = 0;
    const OFF: u8 = 1;
    const ON: u8 = 2;

    fn get(&self) -> Option<bool> {
        Self::decode(self.0.load(Ordering::SeqCst))
    }

    /// Record `on` and return the previous state.
    fn replace(&self, on: bool) -> Option<bool> {
        let next = if on { Self::ON } else { Self::OFF };
        Self::decode(self.0.swap(next, Ordering::SeqCst))
    }

    fn decode(raw: u8) -> Option<bool> {
        match raw {
            Self::ON => Some(true),
            Self::OFF => Some(false),
            _ => None,
        }
    }
}

type Reply = oneshot::Sender<Result<Value, BridgeError>>;

struct Request {
    uri: &'static str,
    payload: Value,
    reply: Option<Reply>,
}

/// [`TvSession`] for LG webOS TVs.
pub struct WebOsSession {
    mac: Option<MacAddress>,
    power: Arc<PowerState>,
    events: broadcast::Sender<DeviceEvent>,
    requests: mpsc::Sender<Request>,
    task: JoinHandle<()>,
}

impl WebOsSession {
    /// Start the connection task.  Must be called from within a Tokio
    /// runtime.
    pub fn start(config: WebOsConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (requests, requests_rx) = mpsc::channel(REQUEST_CAPACITY);
        let power = Arc::new(PowerState::default());

        info!(url = %config.url(), paired = config.client_key.is_some(), "starting webOS session");

        let link = Link {
            url: config.url(),
            client_key: config.client_key.clone(),
            power: Arc::clone(&power),
            events: events.clone(),
        };
        let task = tokio::spawn(link.run(requests_rx));

        Self {
            mac: config.mac,
            power,
            events,
            requests,
            task,
        }
    }

    fn send(&self, uri: &'static str, payload: Value) -> Result<(), BridgeError> {
        self.requests
            .try_send(Request {
                uri,
                payload,
                reply: None,
            })
            .map_err(|e| BridgeError::Session(format!("{uri}: {e}")))
    }

    async fn call(&self, uri: &'static str, payload: Value) -> Result<Value, BridgeError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .try_send(Request {
                uri,
                payload,
                reply: Some(tx),
            })
            .map_err(|e| BridgeError::Session(format!("{uri}: {e}")))?;
        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BridgeError::Session(format!("{uri}: connection closed"))),
            Err(_) => Err(BridgeError::Session(format!("{uri}: no reply"))),
        }
    }
}

impl Drop for WebOsSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl TvSession for WebOsSession {
    fn events(&self) -> BoxStream<'static, DeviceEvent> {
        broadcast_stream(self.events.subscribe(), "webos")
    }

    fn is_powered_on(&self) -> bool {
        self.power.get() == Some(true)
    }

    async fn power_on(&self) -> Result<(), BridgeError> {
        let mac = self
            .mac
            .ok_or_else(|| BridgeError::Session("power on requires a MAC address".to_string()))?;
        wol::wake(mac).await
    }

    async fn power_off(&self) -> Result<(), BridgeError> {
        self.send("ssap://system/turnOff", json!({}))
    }

    async fn set_volume(&self, level: u8) -> Result<(), BridgeError> {
        self.send("ssap://audio/setVolume", json!({ "volume": level }))
    }

    async fn set_backlight(&self, level: u8) -> Result<(), BridgeError> {
        self.send(
            "ssap://settings/setSystemSettings",
            json!({ "category": "picture", "settings": { "backlight": level } }),
        )
    }

    async fn screen_on(&self) -> Result<(), BridgeError> {
        self.send(
            "ssap://com.webos.service.tvpower/power/turnOnScreen",
            json!({ "standbyMode": "active" }),
        )
    }

    async fn screen_off(&self) -> Result<(), BridgeError> {
        self.send(
            "ssap://com.webos.service.tvpower/power/turnOffScreen",
            json!({ "standbyMode": "active" }),
        )
    }

    async fn launch_app(&self, app_id: &str) -> Result<(), BridgeError> {
        self.send("ssap://system.launcher/launch", json!({ "id": app_id }))
    }

    async fn list_external_inputs(&self) -> Result<Vec<String>, BridgeError> {
        let reply = self.call("ssap://tv/getExternalInputList", json!({})).await?;
        Ok(external_input_ids(&reply))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection task
// ─────────────────────────────────────────────────────────────────────────────

struct Link {
    url: String,
    client_key: Option<String>,
    power: Arc<PowerState>,
    events: broadcast::Sender<DeviceEvent>,
}

impl Link {
    async fn run(self, mut requests: mpsc::Receiver<Request>) {
        let mut reconnect_delay = INITIAL_RECONNECT_DELAY;
        loop {
            match connect_async(self.url.as_str()).await {
                Ok((ws, _)) => {
                    info!(url = %self.url, "connected to TV");
                    reconnect_delay = INITIAL_RECONNECT_DELAY;
                    if let Err(e) = self.serve(ws, &mut requests).await {
                        warn!(error = %e, "TV connection ended");
                    }
                    self.set_powered(false);
                }
                Err(e) => {
                    debug!(url = %self.url, error = %e, "TV unreachable");
                    self.set_powered(false);
                }
            }

            // Fail anything queued while there is no socket, then wait.
            let sleep = tokio::time::sleep(reconnect_delay);
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    _ = &mut sleep => break,
                    request = requests.recv() => match request {
                        Some(request) => reject(request, "TV not connected"),
                        None => return,
                    },
                }
            }
            reconnect_delay = std::cmp::min(reconnect_delay * 2, MAX_RECONNECT_DELAY);
        }
    }

    async fn serve(
        &self,
        ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
        requests: &mut mpsc::Receiver<Request>,
    ) -> Result<(), BridgeError> {
        let (mut tx, mut rx) = ws.split();
        let mut pending: HashMap<String, Reply> = HashMap::new();
        let mut next_id: u64 = 0;
        let mut registered = false;

        send_frame(&mut tx, register_frame(self.client_key.as_deref())).await?;

        loop {
            tokio::select! {
                frame = rx.next() => {
                    let text = match frame {
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(Message::Close(_))) | None => return Ok(()),
                        Some(Err(e)) => return Err(BridgeError::Session(e.to_string())),
                        Some(Ok(_)) => continue,
                    };
                    let Ok(message) = serde_json::from_str::<Value>(text.as_str()) else {
                        warn!("ignoring non-JSON frame from TV");
                        continue;
                    };
                    if self.handle_message(&message, &mut pending) && !registered {
                        registered = true;
                        for sub in Subscription::ALL {
                            let frame =
                                request_frame(sub.id(), "subscribe", sub.uri(), &sub.payload());
                            send_frame(&mut tx, frame).await?;
                        }
                        self.emit(DeviceEvent::bare(EventKind::SetupComplete));
                    }
                }
                request = requests.recv(), if registered => {
                    let Some(request) = request else { return Ok(()) };
                    next_id += 1;
                    let id = format!("req_{next_id}");
                    debug!(uri = request.uri, id = %id, "sending request");
                    let frame = request_frame(&id, "request", request.uri, &request.payload);
                    send_frame(&mut tx, frame).await?;
                    if let Some(reply) = request.reply {
                        pending.insert(id, reply);
                    }
                }
            }
        }
    }

    /// Returns `true` when `message` completes registration.
    fn handle_message(&self, message: &Value, pending: &mut HashMap<String, Reply>) -> bool {
        let kind = message.get("type").and_then(Value::as_str).unwrap_or_default();
        let id = message.get("id").and_then(Value::as_str).unwrap_or_default();
        let payload = message.get("payload").cloned().unwrap_or(Value::Null);

        if id == REGISTER_ID {
            match kind {
                "registered" => {
                    self.note_client_key(&payload);
                    return true;
                }
                "response" if payload.get("pairingType").is_some() => {
                    info!("accept the pairing prompt on the TV");
                }
                "error" => error!(error = ?message.get("error"), "TV rejected registration"),
                _ => {}
            }
            return false;
        }

        if let Some(reply) = pending.remove(id) {
            let result = if kind == "error" {
                Err(BridgeError::Session(
                    message.get("error").and_then(Value::as_str).unwrap_or("error").to_string(),
                ))
            } else {
                Ok(payload)
            };
            let _ = reply.send(result);
            return false;
        }

        if let Some(sub) = Subscription::from_id(id) {
            if kind == "error" {
                warn!(subscription = ?sub, error = ?message.get("error"), "subscription failed");
                return false;
            }
            for event in subscription_events(sub, &payload, self.power.get()) {
                self.emit(event);
            }
        } else if kind == "error" {
            warn!(id, error = ?message.get("error"), "TV reported an error");
        }
        false
    }

    fn note_client_key(&self, payload: &Value) {
        let issued = payload.get("client-key").and_then(Value::as_str);
        match (issued, self.client_key.as_deref()) {
            (Some(issued), Some(configured)) if issued == configured => {
                info!("registered with TV");
            }
            (Some(issued), _) => {
                warn!(
                    client_key = issued,
                    "TV issued a new client key; set `client_key` in the [tv] config section to skip pairing"
                );
            }
            (None, _) => info!("registered with TV"),
        }
    }

    fn set_powered(&self, on: bool) {
        if self.power.replace(on) != Some(on) {
            let kind = if on { EventKind::PowerOn } else { EventKind::PowerOff };
            let _ = self.events.send(DeviceEvent::bare(kind));
        }
    }

    fn emit(&self, event: DeviceEvent) {
        match event.kind {
            EventKind::PowerOn => {
                self.power.replace(true);
            }
            EventKind::PowerOff => {
                self.power.replace(false);
            }
            _ => {}
        }
        // No observers yet is fine; the bridge may still be starting.
        let _ = self.events.send(event);
    }
}

fn reject(request: Request, reason: &str) {
    match request.reply {
        Some(reply) => {
            let _ = reply.send(Err(BridgeError::Session(reason.to_string())));
        }
        None => warn!(uri = request.uri, reason, "dropping TV request"),
    }
}

async fn send_frame<S>(tx: &mut S, frame: Value) -> Result<(), BridgeError>
where
    S: futures_util::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    tx.send(Message::Text(frame.to_string().into()))
        .await
        .map_err(|e| BridgeError::Session(format!("send failed: {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Frames and payload translation
// ─────────────────────────────────────────────────────────────────────────────

fn register_frame(client_key: Option<&str>) -> Value {
    let mut payload = json!({
        "forcePairing": false,
        "pairingType": "PROMPT",
        "manifest": {
            "manifestVersion": 1,
            "appVersion": "1.0",
            "permissions": PERMISSIONS,
        },
    });
    if let Some(key) = client_key {
        payload["client-key"] = json!(key);
    }
    json!({ "id": REGISTER_ID, "type": "register", "payload": payload })
}

fn request_frame(id: &str, kind: &str, uri: &str, payload: &Value) -> Value {
    json!({ "id": id, "type": kind, "uri": uri, "payload": payload })
}

/// Interpret a `getPowerState` payload.  `None` when the state is not one
/// that says anything about power.
fn power_from_state(payload: &Value) -> Option<bool> {
    let processing = payload.get("processing").and_then(Value::as_str);
    if matches!(
        processing,
        Some("Request Power Off" | "Request Suspend" | "Prepare Suspend" | "Request Active Standby")
    ) {
        return Some(false);
    }
    match payload.get("state").and_then(Value::as_str)? {
        "Active" | "Screen Off" | "Screen Saver" => Some(true),
        "Active Standby" | "Suspend" | "Power Off" => Some(false),
        _ => None,
    }
}

/// Translate one subscription update into device events.  `was_on` is the
/// power state before this update, `None` while it is still unknown.
///
/// Payloads are normalized to the shapes documented on [`EventKind`] when
/// they are recognized and passed through untouched otherwise.
fn subscription_events(
    sub: Subscription,
    payload: &Value,
    was_on: Option<bool>,
) -> Vec<DeviceEvent> {
    match sub {
        Subscription::Volume => {
            // Newer firmware nests the level under `volumeStatus`.
            let normalized = match payload.pointer("/volumeStatus/volume") {
                Some(volume) => json!({ "volume": volume }),
                None => payload.clone(),
            };
            vec![DeviceEvent::new(EventKind::AudioStatusChanged, normalized)]
        }
        Subscription::Picture => {
            let settings = payload.get("settings").cloned().unwrap_or_else(|| payload.clone());
            vec![DeviceEvent::new(EventKind::PictureSettingsChanged, settings)]
        }
        Subscription::Power => {
            let mut events = Vec::with_capacity(2);
            match power_from_state(payload) {
                Some(on) if was_on != Some(on) => {
                    let kind = if on { EventKind::PowerOn } else { EventKind::PowerOff };
                    events.push(DeviceEvent::bare(kind));
                }
                _ => {}
            }
            events.push(DeviceEvent::new(EventKind::ScreenStateChanged, payload.clone()));
            events
        }
        Subscription::ForegroundApp => {
            vec![DeviceEvent::new(EventKind::ForegroundAppChanged, payload.clone())]
        }
    }
}

fn external_input_ids(reply: &Value) -> Vec<String> {
    reply
        .get("devices")
        .and_then(Value::as_array)
        .map(|devices| {
            devices
                .iter()
                .filter_map(|d| d.get("appId").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
