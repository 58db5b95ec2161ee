//! [`Bridge`] – the single task that keeps the TV and the bus in sync.
//!
//! One `tokio::select!` loop multiplexes the device event stream, the bus
//! message stream and a shutdown signal.  Each input is handled to completion
//! before the next one is taken, so the [`StateStore`] is owned by the loop
//! and lent to the routers without any locking.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tvbridge_hal::SimTv;
//! use tvbridge_kernel::BridgeConfig;
//! use tvbridge_middleware::LocalBus;
//! use tvbridge_runtime::Bridge;
//!
//! # async fn demo() -> Result<(), tvbridge_types::BridgeError> {
//! let bridge = Bridge::new(
//!     BridgeConfig::standard("home/livingroom/tv"),
//!     Arc::new(SimTv::new()),
//!     Arc::new(LocalBus::default()),
//! );
//! let handle = bridge.spawn();
//! // ... later
//! let store = handle.shutdown().await?;
//! # let _ = store;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tvbridge_hal::TvSession;
use tvbridge_kernel::{BridgeConfig, CommandOutcome, CommandRouter, EventRouter, StateStore};
use tvbridge_middleware::MessageBus;
use tvbridge_types::{BridgeError, BusMessage, DeviceEvent, EventKind};

pub struct Bridge {
    session: Arc<dyn TvSession>,
    bus: Arc<dyn MessageBus>,
    store: StateStore,
    events: EventRouter,
    commands: CommandRouter,
}

impl Bridge {
    pub fn new(
        config: BridgeConfig,
        session: Arc<dyn TvSession>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let config = Arc::new(config);
        Self {
            session,
            bus,
            store: StateStore::new(),
            events: EventRouter::new(Arc::clone(&config)),
            commands: CommandRouter::new(config),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Route one device event.
    pub async fn handle_event(&mut self, event: DeviceEvent) {
        if event.kind == EventKind::SetupComplete {
            self.on_setup_complete().await;
            return;
        }
        self.events
            .route(&event, &mut self.store, self.bus.as_ref())
            .await;
    }

    /// Route one inbound bus message.
    pub async fn handle_message(&mut self, message: BusMessage) -> CommandOutcome {
        self.commands
            .route(&message, &mut self.store, self.session.as_ref())
            .await
    }

    /// Subscribe to both sources and run the loop on a new task.
    ///
    /// Subscriptions are taken before this returns, so anything emitted after
    /// `spawn` is seen by the bridge.
    pub fn spawn(self) -> BridgeHandle {
        let events = self.session.events();
        let messages = self.bus.messages();
        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(self.serve(events, messages, signal));
        BridgeHandle { shutdown, task }
    }

    async fn serve(
        mut self,
        mut events: BoxStream<'static, DeviceEvent>,
        mut messages: BoxStream<'static, BusMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> StateStore {
        info!("bridge running");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                event = events.next() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => {
                        warn!("device event stream ended");
                        break;
                    }
                },
                message = messages.next() => match message {
                    Some(message) => {
                        let outcome = self.handle_message(message).await;
                        debug!(?outcome, "bus message handled");
                    }
                    None => {
                        warn!("bus message stream ended");
                        break;
                    }
                },
            }
        }
        info!(channels_known = self.store.len(), "bridge stopped");
        self.store
    }

    async fn on_setup_complete(&self) {
        match self.session.list_external_inputs().await {
            Ok(inputs) => info!(?inputs, "tv setup complete"),
            Err(e) => warn!(error = %e, "tv setup complete, could not list external inputs"),
        }
    }
}

/// Owner's side of a spawned [`Bridge`].
pub struct BridgeHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<StateStore>,
}

impl BridgeHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop after the input in progress and return the final state.
    pub async fn shutdown(self) -> Result<StateStore, BridgeError> {
        // The task may already be gone if one of its streams ended.
        let _ = self.shutdown.send(true);
        self.task
            .await
            .map_err(|e| BridgeError::Task(format!("bridge task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tvbridge_hal::SimTv;
    use tvbridge_middleware::LocalBus;
    use tvbridge_types::{Channel, TvCommand};

    const NS: &str = "tv";

    fn bridge(tv: &Arc<SimTv>, bus: &LocalBus) -> Bridge {
        Bridge::new(
            BridgeConfig::standard(NS),
            Arc::clone(tv) as Arc<dyn TvSession>,
            Arc::new(bus.clone()),
        )
    }

    fn spawn(tv: &Arc<SimTv>, bus: &LocalBus) -> BridgeHandle {
        bridge(tv, bus).spawn()
    }

    fn show(msg: &BusMessage) -> String {
        format!("{}={}", msg.topic, String::from_utf8_lossy(&msg.payload))
    }

    /// Wait for the next message the running bridge publishes under `sub`.
    async fn next_on(sub: &mut tvbridge_middleware::TopicSubscriber) -> String {
        let msg = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("bridge published in time")
            .expect("bus open");
        show(&msg)
    }

    fn drain(sub: &mut tvbridge_middleware::TopicSubscriber) -> Vec<String> {
        let mut seen = Vec::new();
        while let Some(msg) = sub.try_recv() {
            seen.push(show(&msg));
        }
        seen
    }

    #[tokio::test]
    async fn device_value_is_published_once_and_its_echo_is_ignored() {
        let tv = Arc::new(SimTv::new().powered_on(true));
        let bus = LocalBus::default();
        let mut sub = bus.subscribe_topic("tv/volume");
        let mut inbound = bus.messages();
        let mut bridge = bridge(&tv, &bus);

        let event = DeviceEvent::new(EventKind::AudioStatusChanged, json!({ "volume": 9 }));
        bridge.handle_event(event.clone()).await;
        bridge.handle_event(event).await;

        assert_eq!(drain(&mut sub), vec!["tv/volume=9"]);
        assert_eq!(bus.retained("tv/volume").as_deref(), Some("9"));

        // The retained publish comes back inbound and is recognised.
        let echo = inbound.next().await.expect("retained publish echoed");
        assert_eq!(show(&echo), "tv/volume=9");
        assert_eq!(bridge.handle_message(echo).await, CommandOutcome::Duplicate);
        assert!(tv.commands().is_empty());
        assert_eq!(bridge.store().get(Channel::Volume), Some("9"));
    }

    #[tokio::test]
    async fn bus_value_reaches_tv_and_its_echo_is_not_republished() {
        let tv = Arc::new(SimTv::new().powered_on(true));
        let bus = LocalBus::default();
        let mut sub = bus.subscribe_topic("tv/");
        let mut device = tv.events();
        let mut bridge = bridge(&tv, &bus);

        let outcome = bridge.handle_message(BusMessage::new("tv/volume", "40")).await;
        assert_eq!(outcome, CommandOutcome::Dispatched(vec![TvCommand::SetVolume(40)]));

        let echo = device.next().await.expect("tv answered the command");
        assert_eq!(echo.kind, EventKind::AudioStatusChanged);
        bridge.handle_event(echo).await;

        assert!(drain(&mut sub).is_empty());
        assert_eq!(bus.retained("tv/volume"), None);
    }

    #[tokio::test]
    async fn power_off_event_resets_dependent_channels() {
        let tv = Arc::new(SimTv::new().powered_on(true));
        let bus = LocalBus::default();
        let mut sub = bus.subscribe_topic("tv/");
        let handle = spawn(&tv, &bus);

        tv.emit(DeviceEvent::bare(EventKind::PowerOff));
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(next_on(&mut sub).await);
        }
        handle.shutdown().await.unwrap();

        assert_eq!(
            seen,
            vec!["tv/power=off", "tv/backlight=0", "tv/volume=0", "tv/screen=off"]
        );
        assert!(tv.commands().is_empty());
    }

    #[tokio::test]
    async fn commands_while_off_are_dropped_but_remembered() {
        let tv = Arc::new(SimTv::new());
        let bus = LocalBus::default();
        let mut bridge = bridge(&tv, &bus);

        let outcome = bridge.handle_message(BusMessage::new("tv/volume", "50")).await;

        assert_eq!(outcome, CommandOutcome::Gated);
        assert!(tv.commands().is_empty());
        assert_eq!(bridge.store().get(Channel::Volume), Some("50"));
    }

    #[tokio::test]
    async fn power_on_from_bus_wakes_tv_and_reports_state() {
        let tv = Arc::new(SimTv::new());
        let bus = LocalBus::default();
        let mut screen = bus.subscribe_topic("tv/screen");
        let handle = spawn(&tv, &bus);

        bus.inject("tv/power", "on");
        assert_eq!(next_on(&mut screen).await, "tv/screen=on");
        handle.shutdown().await.unwrap();

        assert_eq!(tv.commands(), vec![TvCommand::PowerOn]);
        assert!(tv.is_powered_on());
        // power=on was already accepted from the bus, so only screen is new.
        assert_eq!(bus.retained("tv/power"), None);
        assert_eq!(bus.retained("tv/screen").as_deref(), Some("on"));
    }

    #[tokio::test]
    async fn setup_complete_publishes_nothing() {
        let tv = Arc::new(SimTv::new());
        let bus = LocalBus::default();
        let mut sub = bus.subscribe_topic("tv/");
        let mut bridge = bridge(&tv, &bus);

        bridge.handle_event(DeviceEvent::bare(EventKind::SetupComplete)).await;

        assert!(drain(&mut sub).is_empty());
        assert!(bridge.store().is_empty());
    }

    #[tokio::test]
    async fn handle_message_can_be_driven_directly() {
        let tv = Arc::new(SimTv::new().powered_on(true).without_echo());
        let bus = LocalBus::default();
        let mut bridge = bridge(&tv, &bus);

        let outcome = bridge
            .handle_message(BusMessage::new("tv/screen", "off"))
            .await;

        assert_eq!(outcome, CommandOutcome::Dispatched(vec![TvCommand::ScreenOff]));
        assert_eq!(bridge.store().get(Channel::Screen), Some("off"));
    }

    #[tokio::test]
    async fn shutdown_stops_the_task() {
        let tv = Arc::new(SimTv::new());
        let bus = LocalBus::default();
        let handle = spawn(&tv, &bus);
        assert!(!handle.is_finished());
        assert!(handle.shutdown().await.is_ok());
    }
}
