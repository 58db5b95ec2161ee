//! MQTT transport for the bridge, built on `rumqttc`.
//!
//! [`MqttBus`] owns the client's event loop in a background task.  The task:
//!
//! * re-subscribes to every channel topic each time the broker acknowledges
//!   a connection, so a broker restart does not silently drop subscriptions;
//! * forwards inbound publishes to every [`MessageBus::messages`] stream;
//! * reconnects with exponential backoff (1 s doubling up to 30 s).
//!
//! Publishing never waits on the broker: a message is queued for the event
//! loop, and a full queue is reported as an error instead of blocking.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, Publish, QoS};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tvbridge_types::{BridgeError, BusMessage};

use crate::bus::{MessageBus, broadcast_stream};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Capacity of the client's outgoing request queue.
const REQUEST_CAPACITY: usize = 64;
const INBOUND_CAPACITY: usize = 256;

/// Connection parameters for [`MqttBus`].
#[derive(Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive: Duration,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "tvbridge".to_string(),
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_some() { &"<redacted>" } else { &"<not set>" },
            )
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

/// [`MessageBus`] backed by an MQTT broker.
pub struct MqttBus {
    client: AsyncClient,
    inbound: broadcast::Sender<BusMessage>,
    task: JoinHandle<()>,
}

impl MqttBus {
    /// Create the client and start its event loop.  The connection itself is
    /// established lazily by the event loop; `topics` are subscribed on every
    /// successful connect.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(config: &MqttConfig, topics: Vec<String>) -> Self {
        let options = build_options(config);
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);

        info!(
            broker = %config.host,
            port = config.port,
            client_id = %config.client_id,
            topics = topics.len(),
            "starting MQTT client"
        );

        let task = tokio::spawn(event_loop_task(
            event_loop,
            client.clone(),
            topics,
            inbound.clone(),
        ));

        Self {
            client,
            inbound,
            task,
        }
    }

    /// Send a DISCONNECT to the broker and stop the event loop.
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!(error = %e, "MQTT disconnect request failed");
        }
        self.task.abort();
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, true, payload.as_bytes().to_vec())
            .map_err(|e| {
                warn!(topic, error = %e, "MQTT request queue full, publish dropped");
                BridgeError::Bus(format!("publish to {topic} failed: {e}"))
            })
    }

    fn messages(&self) -> BoxStream<'static, BusMessage> {
        broadcast_stream(self.inbound.subscribe(), "mqtt")
    }
}

pub(crate) fn build_options(config: &MqttConfig) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
    options.set_keep_alive(config.keep_alive);
    if let Some(username) = &config.username {
        options.set_credentials(username, config.password.as_deref().unwrap_or_default());
    }
    options
}

pub(crate) fn next_backoff(current: Duration) -> Duration {
    std::cmp::min(current * 2, MAX_RECONNECT_DELAY)
}

pub(crate) fn to_bus_message(publish: &Publish) -> BusMessage {
    BusMessage::new(publish.topic.clone(), publish.payload.to_vec())
}

async fn event_loop_task(
    mut event_loop: EventLoop,
    client: AsyncClient,
    topics: Vec<String>,
    inbound: broadcast::Sender<BusMessage>,
) {
    let mut reconnect_delay = INITIAL_RECONNECT_DELAY;
    let mut consecutive_errors: u32 = 0;

    loop {
        match event_loop.poll().await {
            Ok(event) => {
                if consecutive_errors > 0 {
                    info!("MQTT connection restored");
                    reconnect_delay = INITIAL_RECONNECT_DELAY;
                    consecutive_errors = 0;
                }
                handle_event(event, &client, &topics, &inbound);
            }
            Err(e) => {
                consecutive_errors += 1;
                error!(
                    error = %e,
                    consecutive_errors,
                    retry_in_secs = reconnect_delay.as_secs(),
                    "MQTT connection error, will retry"
                );
                tokio::time::sleep(reconnect_delay).await;
                reconnect_delay = next_backoff(reconnect_delay);
            }
        }
    }
}

fn handle_event(
    event: Event,
    client: &AsyncClient,
    topics: &[String],
    inbound: &broadcast::Sender<BusMessage>,
) {
    match event {
        Event::Incoming(Packet::ConnAck(_)) => {
            info!("connected to MQTT broker");
            for topic in topics {
                // `try_subscribe` only queues the request; the event loop we
                // are running inside of is what sends it.
                match client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                    Ok(()) => info!(topic = %topic, "subscribing"),
                    Err(e) => error!(topic = %topic, error = %e, "failed to queue subscription"),
                }
            }
        }
        Event::Incoming(Packet::Publish(publish)) => {
            debug!(
                topic = %publish.topic,
                payload_len = publish.payload.len(),
                "received MQTT message"
            );
            if inbound.send(to_bus_message(&publish)).is_err() {
                warn!(topic = %publish.topic, "no bridge listening, message dropped");
            }
        }
        Event::Incoming(Packet::SubAck(_)) => debug!("subscription acknowledged"),
        Event::Incoming(Packet::PingResp) => {}
        other => debug!(event = ?other, "MQTT event"),
    }
}
