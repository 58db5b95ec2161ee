//! Bus abstraction and the in-process implementation.
//!
//! The bridge only needs two things from a message bus: a way to publish a
//! retained UTF-8 value to a topic, and a stream of every inbound message.
//! [`MessageBus`] captures exactly that.  [`LocalBus`] implements it on top of
//! a [`tokio::sync::broadcast`] channel so that the whole bridge can run in
//! tests and in `--simulate` mode without a broker.
//!
//! Like a real MQTT broker, [`LocalBus`] delivers a client's own publishes
//! back to its subscribers and replays retained values to new subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast;
use tracing::warn;
use tvbridge_types::{BridgeError, BusMessage};

/// Default channel capacity (number of buffered messages before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Narrow view of a publish/subscribe transport used by the bridge.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish `payload` to `topic` with retained delivery.
    ///
    /// Fire-and-forget from the caller's perspective: transports queue the
    /// message and handle retries themselves.
    async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), BridgeError>;

    /// Stream of inbound messages.  Dropping the stream cancels the
    /// subscription.
    fn messages(&self) -> BoxStream<'static, BusMessage>;
}

/// Turn a broadcast receiver into a stream that skips over lag and ends when
/// the sender is gone.
pub fn broadcast_stream<T>(
    receiver: broadcast::Receiver<T>,
    label: &'static str,
) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
{
    Box::pin(stream::unfold(receiver, move |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(item) => return Some((item, rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(stream = label, lagged_by = n, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }))
}

/// In-process bus with retained values.  Clone it cheaply – all clones share
/// the same channel and retained table.
#[derive(Clone, Debug)]
pub struct LocalBus {
    sender: broadcast::Sender<BusMessage>,
    retained: Arc<Mutex<HashMap<String, String>>>,
}

impl LocalBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            retained: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Deliver a non-retained message as if it came from another client.
    ///
    /// Returns the number of subscribers that were handed the message.
    pub fn inject(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> usize {
        self.sender.send(BusMessage::new(topic, payload)).unwrap_or(0)
    }

    /// The retained value currently held for `topic`, if any.
    pub fn retained(&self, topic: &str) -> Option<String> {
        self.retained_table().get(topic).cloned()
    }

    /// Subscribe to every message whose topic starts with `prefix`.
    pub fn subscribe_topic(&self, prefix: impl Into<String>) -> TopicSubscriber {
        TopicSubscriber {
            prefix: prefix.into(),
            receiver: self.sender.subscribe(),
        }
    }

    fn retained_table(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.retained.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish_retained(&self, topic: &str, payload: &str) -> Result<(), BridgeError> {
        self.retained_table()
            .insert(topic.to_string(), payload.to_string());
        // No subscribers is a normal condition for a retained publish.
        let _ = self.sender.send(BusMessage::new(topic, payload));
        Ok(())
    }

    fn messages(&self) -> BoxStream<'static, BusMessage> {
        // Subscribe before taking the snapshot so nothing published in
        // between is lost.
        let live = broadcast_stream(self.sender.subscribe(), "local-bus");
        let mut snapshot: Vec<BusMessage> = self
            .retained_table()
            .iter()
            .map(|(topic, value)| BusMessage::new(topic.clone(), value.clone()))
            .collect();
        snapshot.sort_by(|a, b| a.topic.cmp(&b.topic));
        Box::pin(stream::iter(snapshot).chain(live))
    }
}

/// A subscriber that only delivers messages whose topic starts with the
/// given prefix.
pub struct TopicSubscriber {
    prefix: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl TopicSubscriber {
    /// Wait for the next matching message.
    ///
    /// Returns `None` when the bus is closed and no further messages will
    /// arrive.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) if msg.topic.starts_with(&self.prefix) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(prefix = %self.prefix, lagged_by = n, "TopicSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`][Self::recv]; `None` when nothing
    /// matching is queued.
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.try_recv() {
                Ok(msg) if msg.topic.starts_with(&self.prefix) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn publish_retained_is_delivered_and_remembered()
    -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::default();
        let mut sub = bus.subscribe_topic("tv/");

        bus.publish_retained("tv/volume", "12").await?;

        let msg = sub.recv().await.ok_or("no message received")?;
        assert_eq!(msg.topic, "tv/volume");
        assert_eq!(msg.payload_str()?, "12");
        assert_eq!(bus.retained("tv/volume").as_deref(), Some("12"));
        Ok(())
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_not_an_error() {
        let bus = LocalBus::default();
        assert!(bus.publish_retained("tv/power", "on").await.is_ok());
        assert_eq!(bus.retained("tv/power").as_deref(), Some("on"));
    }

    #[tokio::test]
    async fn inject_is_not_retained() {
        let bus = LocalBus::default();
        let mut sub = bus.subscribe_topic("tv/");
        assert_eq!(bus.inject("tv/input", "com.webos.app.hdmi1"), 1);

        let msg = sub.recv().await.expect("injected message");
        assert_eq!(msg.topic, "tv/input");
        assert!(bus.retained("tv/input").is_none());
    }

    #[tokio::test]
    async fn topic_subscriber_filters_by_prefix() {
        let bus = LocalBus::default();
        let mut sub = bus.subscribe_topic("living/tv");

        bus.inject("kitchen/radio/volume", "3");
        bus.inject("living/tv/volume", "7");

        let msg = sub.recv().await.expect("matching message");
        assert_eq!(msg.topic, "living/tv/volume");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn new_stream_replays_retained_values_first() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::default();
        bus.publish_retained("tv/volume", "30").await?;
        bus.publish_retained("tv/power", "on").await?;

        let mut messages = bus.messages();
        let first = messages.next().await.ok_or("missing replay")?;
        let second = messages.next().await.ok_or("missing replay")?;
        assert_eq!(first.topic, "tv/power");
        assert_eq!(second.topic, "tv/volume");

        bus.inject("tv/screen", "off");
        let live = messages.next().await.ok_or("missing live message")?;
        assert_eq!(live.topic, "tv/screen");
        Ok(())
    }

    #[tokio::test]
    async fn own_publishes_are_echoed_to_streams() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::default();
        let mut messages = bus.messages();

        bus.publish_retained("tv/backlight", "80").await?;

        let echoed = tokio::time::timeout(Duration::from_millis(100), messages.next())
            .await?
            .ok_or("stream ended")?;
        assert_eq!(echoed.payload_str()?, "80");
        Ok(())
    }

    #[tokio::test]
    async fn broadcast_stream_skips_lag() {
        let (tx, rx) = broadcast::channel(4);
        let mut stream = broadcast_stream(rx, "test");
        for i in 0..32u32 {
            let _ = tx.send(i);
        }
        drop(tx);

        let received: Vec<u32> = stream.by_ref().collect().await;
        assert_eq!(received, vec![28, 29, 30, 31]);
    }
}
