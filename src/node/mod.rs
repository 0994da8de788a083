// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node orchestrator.
//!
//! The [`Node`] owns the ordered driver registry and decides what reaches
//! the broker:
//!
//! ```text
//!  driver threads ──DriverEvent──▶ aggregation task ──▶ MqttRouter
//!                                       │
//!                         (dropped while the node is offline)
//! ```
//!
//! Startup loads or seeds each driver's persisted config and initializes the
//! drivers. Going online starts them, publishes their status and announces
//! their devices. Remote config pushes on
//! `<node>/drivers/<driver>/set_config` reconfigure a single driver.

mod announce;
mod mode;

pub use mode::SystemMode;

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::device::{DeviceSet, NodeIdentity};
use crate::driver::{Driver, DriverEvent, DriverEventKind, DriverState};
use crate::error::{Error, SettingsError};
use crate::event::{BusEventKind, EventBus};
use crate::protocol::{MqttRouter, QoS};
use crate::settings::{MAX_CONFIG_SIZE, SettingsStore};

/// Default capacity of the queue between drivers and the aggregation task.
pub const DEFAULT_AGGREGATION_CAPACITY: usize = 32;

/// A registered driver.
struct Slot {
    name: String,
    default_config: Option<String>,
    driver: Arc<tokio::sync::Mutex<Driver>>,
    devices: DeviceSet,
}

struct NodeInner {
    identity: NodeIdentity,
    router: MqttRouter,
    bus: EventBus,
    store: Arc<dyn SettingsStore>,
    slots: Vec<Slot>,
    mode: watch::Sender<SystemMode>,
    events: Mutex<Option<mpsc::Receiver<DriverEvent>>>,
    aggregator: Mutex<Option<JoinHandle<()>>>,
}

/// Owner of the drivers and of the online/offline policy.
///
/// Cheaply cloneable; clones share the same registry.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("identity", &self.inner.identity)
            .field("mode", &self.mode())
            .field("drivers", &self.driver_names())
            .finish_non_exhaustive()
    }
}

impl Node {
    /// Creates a builder from the collaborators every node needs.
    #[must_use]
    pub fn builder(
        identity: NodeIdentity,
        router: MqttRouter,
        bus: EventBus,
        store: impl SettingsStore + 'static,
    ) -> NodeBuilder {
        NodeBuilder {
            identity,
            router,
            bus,
            store: Arc::new(store),
            drivers: Vec::new(),
            capacity: DEFAULT_AGGREGATION_CAPACITY,
        }
    }

    /// Returns the node identity.
    #[must_use]
    pub fn identity(&self) -> &NodeIdentity {
        &self.inner.identity
    }

    /// Returns the router.
    #[must_use]
    pub fn router(&self) -> &MqttRouter {
        &self.inner.router
    }

    /// Returns the current mode.
    #[must_use]
    pub fn mode(&self) -> SystemMode {
        *self.inner.mode.borrow()
    }

    /// Returns a receiver following mode changes.
    #[must_use]
    pub fn watch_mode(&self) -> watch::Receiver<SystemMode> {
        self.inner.mode.subscribe()
    }

    /// Returns the names of the registered drivers, in registration order.
    #[must_use]
    pub fn driver_names(&self) -> Vec<String> {
        self.inner.slots.iter().map(|s| s.name.clone()).collect()
    }

    /// Returns the state of a driver.
    pub async fn driver_state(&self, name: &str) -> Option<DriverState> {
        let slot = self.slot(name)?;
        Some(slot.driver.lock().await.state())
    }

    /// Returns the live device set of a driver.
    #[must_use]
    pub fn devices(&self, name: &str) -> Option<DeviceSet> {
        self.slot(name).map(|s| s.devices.clone())
    }

    /// Initializes every driver and starts the aggregation task.
    ///
    /// Each driver gets its persisted config, or its default literal which
    /// is then persisted. A failing driver is logged and skipped. Ends in
    /// [`SystemMode::Offline`].
    pub async fn start(&self) {
        tracing::info!(node = %self.inner.identity.name, drivers = self.inner.slots.len(), "Starting node");
        self.set_mode(SystemMode::Boot).await;

        for slot in &self.inner.slots {
            let config = self.load_config(slot);
            let mut driver = slot.driver.lock().await;
            if let Err(e) = driver.init(&config).await {
                tracing::error!(driver = %slot.name, error = %e, "Driver failed to initialize");
            }
        }

        self.spawn_aggregator();
        self.set_mode(SystemMode::Offline).await;
    }

    /// Switches to [`SystemMode::Online`].
    ///
    /// Starts every initialized driver, publishes each driver's config and
    /// state, listens for remote config, then announces the devices of every
    /// running driver. Does nothing if already online.
    pub async fn online(&self) {
        if !self.set_mode(SystemMode::Online).await {
            tracing::debug!("Node already online");
            return;
        }
        tracing::info!(node = %self.inner.identity.name, "Node goes online");

        for slot in &self.inner.slots {
            let mut driver = slot.driver.lock().await;
            if driver.state() == DriverState::Initialized
                && let Err(e) = driver.start().await
            {
                tracing::error!(driver = %slot.name, error = %e, "Driver failed to start");
            }
            self.publish_driver_status(&driver);
            self.listen_for_config(&slot.name);
        }

        for slot in &self.inner.slots {
            if slot.driver.lock().await.state() == DriverState::Running {
                self.announce_devices(slot);
            }
        }
    }

    /// Switches to [`SystemMode::Offline`]. Drivers keep running; their
    /// events are discarded until the node is online again.
    pub async fn offline(&self) {
        if self.set_mode(SystemMode::Offline).await {
            tracing::info!(node = %self.inner.identity.name, "Node goes offline");
        }
    }

    /// Replaces the config of one driver and restarts it.
    ///
    /// The new config is persisted first. The driver is stopped (or reset if
    /// it never started), initialized with `config` and, when the node is
    /// online, started and announced again. Devices the driver no longer
    /// exposes are withdrawn.
    ///
    /// # Errors
    ///
    /// - [`SettingsError::TooLarge`] for configs over [`MAX_CONFIG_SIZE`]
    /// - [`Error::DriverNotFound`] for an unknown driver
    /// - [`Error::Driver`] if the driver fails to initialize
    pub async fn apply_remote_config(&self, name: &str, config: &[u8]) -> crate::Result<()> {
        if config.len() > MAX_CONFIG_SIZE {
            tracing::warn!(driver = %name, size = config.len(), "Remote config too large");
            return Err(SettingsError::TooLarge {
                size: config.len(),
                max: MAX_CONFIG_SIZE,
            }
            .into());
        }
        let slot = self
            .slot(name)
            .ok_or_else(|| Error::DriverNotFound(name.to_string()))?;
        tracing::info!(driver = %name, size = config.len(), "Applying remote config");

        if let Err(e) = self.inner.store.save_driver_config(name, config) {
            tracing::error!(driver = %name, error = %e, "Could not persist driver config");
        }

        let mut driver = slot.driver.lock().await;
        let previous = slot.devices.snapshot();
        let halted = match driver.state() {
            DriverState::Running | DriverState::Invalid => driver.stop().await,
            DriverState::Initialized => driver.reset().await,
            DriverState::New | DriverState::Finished => Ok(()),
        };
        if let Err(e) = halted {
            tracing::warn!(driver = %name, error = %e, "Could not halt driver before reconfiguration");
        }

        let init = driver.init(config).await;
        if let Err(e) = &init {
            tracing::error!(driver = %name, error = %e, "Driver failed to initialize");
        }

        for old in &previous {
            if slot.devices.get(old.uid()).is_none() {
                self.withdraw_device(&slot.name, old);
            }
        }

        if self.mode() == SystemMode::Online {
            if driver.state() == DriverState::Initialized
                && let Err(e) = driver.start().await
            {
                tracing::error!(driver = %name, error = %e, "Driver failed to start");
            }
            self.publish_driver_status(&driver);
            if driver.state() == DriverState::Running {
                self.announce_devices(slot);
            }
        }

        init.map_err(Error::from)
    }

    /// Stops every running driver and the aggregation task.
    pub async fn shutdown(&self) {
        tracing::info!(node = %self.inner.identity.name, "Shutting down node");
        for slot in &self.inner.slots {
            let mut driver = slot.driver.lock().await;
            let result = match driver.state() {
                DriverState::Running | DriverState::Invalid => driver.stop().await,
                DriverState::Initialized => driver.reset().await,
                DriverState::New | DriverState::Finished => Ok(()),
            };
            if let Err(e) = result {
                tracing::warn!(driver = %slot.name, error = %e, "Driver did not stop cleanly");
            }
        }
        if let Some(handle) = self.inner.aggregator.lock().take() {
            handle.abort();
        }
    }

    fn slot(&self, name: &str) -> Option<&Slot> {
        self.inner.slots.iter().find(|s| s.name == name)
    }

    /// Updates the mode, raising `ModeChanged` if it changed.
    ///
    /// Returns `true` on change.
    async fn set_mode(&self, mode: SystemMode) -> bool {
        let changed = self.inner.mode.send_if_modified(|current| {
            if *current == mode {
                false
            } else {
                *current = mode;
                true
            }
        });
        if changed {
            tracing::debug!(mode = %mode, "Mode changed");
            if let Err(e) = self
                .inner
                .bus
                .send(BusEventKind::ModeChanged, &[mode.as_byte()])
                .await
            {
                tracing::warn!(mode = %mode, error = %e, "Could not raise mode change");
            }
        }
        changed
    }

    /// Returns the persisted config of a driver, seeding it from the default
    /// literal when none exists.
    fn load_config(&self, slot: &Slot) -> Vec<u8> {
        match self.inner.store.load_driver_config(&slot.name) {
            Ok(Some(config)) => {
                tracing::debug!(driver = %slot.name, size = config.len(), "Loaded driver config");
                return config;
            }
            Ok(None) => {
                tracing::info!(driver = %slot.name, "No stored config, using default");
            }
            Err(e) => {
                tracing::error!(driver = %slot.name, error = %e, "Could not load driver config, using default");
            }
        }

        let default = slot.default_config.clone().unwrap_or_default();
        if let Err(e) = self
            .inner
            .store
            .save_driver_config(&slot.name, default.as_bytes())
        {
            tracing::error!(driver = %slot.name, error = %e, "Could not persist default config");
        }
        default.into_bytes()
    }

    fn spawn_aggregator(&self) {
        let Some(mut events) = self.inner.events.lock().take() else {
            tracing::debug!("Aggregation task already running");
            return;
        };
        let mut stale = 0usize;
        while events.try_recv().is_ok() {
            stale += 1;
        }
        tracing::debug!(dropped = stale, "Dropped device events raised during boot");
        let handle = tokio::spawn(aggregate(Arc::downgrade(&self.inner), events));
        *self.inner.aggregator.lock() = Some(handle);
    }

    /// Subscribes the set_config topic of a driver.
    fn listen_for_config(&self, name: &str) {
        let topic = match self.inner.router.subtopic(&format!("drivers/{name}/set_config")) {
            Ok(topic) => topic,
            Err(e) => {
                tracing::error!(driver = %name, error = %e, "Cannot listen for remote config");
                return;
            }
        };

        let node = Arc::downgrade(&self.inner);
        let driver = name.to_string();
        let result = self.inner.router.subscribe(
            &topic,
            QoS::AtLeastOnce,
            &format!("driver:{name}"),
            move |msg| {
                let Some(inner) = node.upgrade() else {
                    return;
                };
                let node = Node { inner };
                let driver = driver.clone();
                let config = msg.payload.clone();
                tokio::spawn(async move {
                    if let Err(e) = node.apply_remote_config(&driver, &config).await {
                        tracing::error!(driver = %driver, error = %e, "Remote config rejected");
                    }
                });
            },
        );
        if let Err(e) = result {
            tracing::warn!(driver = %name, error = %e, "Could not subscribe remote config topic");
        }
    }
}

/// Forwards driver events to the broker while the node is online.
async fn aggregate(node: Weak<NodeInner>, mut events: mpsc::Receiver<DriverEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = node.upgrade() else {
            break;
        };
        let node = Node { inner };
        if node.mode() != SystemMode::Online {
            tracing::trace!(driver = %event.driver, uid = %event.device.uid(), "Offline, dropping device event");
            continue;
        }

        match event.kind {
            DriverEventKind::Updated => node.publish_state(&event.device),
            DriverEventKind::Added => node.announce_device(&event.driver, &event.device),
            DriverEventKind::Removed => node.withdraw_device(&event.driver, &event.device),
        }
    }
    tracing::debug!("Aggregation task finished");
}

/// Builder for [`Node`].
pub struct NodeBuilder {
    identity: NodeIdentity,
    router: MqttRouter,
    bus: EventBus,
    store: Arc<dyn SettingsStore>,
    drivers: Vec<Driver>,
    capacity: usize,
}

impl std::fmt::Debug for NodeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeBuilder")
            .field("identity", &self.identity)
            .field("drivers", &self.drivers.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl NodeBuilder {
    /// Registers a driver. Drivers are started in registration order.
    ///
    /// A driver whose name is already registered is dropped with a warning.
    #[must_use]
    pub fn driver(mut self, driver: Driver) -> Self {
        if self.drivers.iter().any(|d| d.name() == driver.name()) {
            tracing::warn!(driver = %driver.name(), "Driver already registered");
            return self;
        }
        self.drivers.push(driver);
        self
    }

    /// Sets the capacity of the driver event queue.
    ///
    /// # Panics
    ///
    /// [`build`](Self::build) panics if `capacity` is zero.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builds the node, attaching every driver to the event queue.
    #[must_use]
    pub fn build(self) -> Node {
        let (events_tx, events_rx) = mpsc::channel(self.capacity);
        let slots = self
            .drivers
            .into_iter()
            .map(|mut driver| {
                driver.set_event_sender(events_tx.clone());
                Slot {
                    name: driver.name().to_string(),
                    default_config: driver.info().default_config().map(str::to_string),
                    devices: driver.devices().clone(),
                    driver: Arc::new(tokio::sync::Mutex::new(driver)),
                }
            })
            .collect();
        let (mode, _) = watch::channel(SystemMode::Init);

        Node {
            inner: Arc::new(NodeInner {
                identity: self.identity,
                router: self.router,
                bus: self.bus,
                store: self.store,
                slots,
                mode,
                events: Mutex::new(Some(events_rx)),
                aggregator: Mutex::new(None),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::device::Device;
    use crate::driver::{DriverContext, DriverHooks, DriverInfo};
    use crate::error::HookError;
    use crate::protocol::{LinkEvent, MemoryConnector};
    use crate::settings::MemoryStore;

    struct Lamp;

    impl DriverHooks for Lamp {
        fn on_init(&mut self, ctx: &DriverContext) -> Result<(), HookError> {
            let count = ctx.config().get_int("count", 1);
            for i in 0..count {
                ctx.add_device(Device::binary_switch(format!("lamp{i}"), |_| {}));
            }
            Ok(())
        }

        fn run(&mut self, ctx: &DriverContext) {
            while ctx.sleep(Duration::from_millis(10)) {}
        }
    }

    fn lamp_driver() -> Driver {
        Driver::new(
            DriverInfo::new("lamps").with_default_config(r#"{"count": 2}"#),
            Lamp,
        )
    }

    fn node(broker: &MemoryConnector, store: &MemoryStore) -> Node {
        let bus = EventBus::with_capacity(32);
        let router = MqttRouter::builder()
            .node_name("n")
            .connector(broker.clone())
            .bus(bus.clone())
            .build()
            .unwrap();
        Node::builder(NodeIdentity::new("n", "sys"), router, bus, store.clone())
            .driver(lamp_driver())
            .build()
    }

    #[tokio::test]
    async fn start_seeds_config_and_goes_offline() {
        let broker = MemoryConnector::new();
        let store = MemoryStore::new();
        let node = node(&broker, &store);

        node.start().await;
        assert_eq!(node.mode(), SystemMode::Offline);
        assert_eq!(
            store.load_driver_config("lamps").unwrap(),
            Some(br#"{"count": 2}"#.to_vec())
        );
        assert_eq!(node.driver_state("lamps").await, Some(DriverState::Initialized));
        assert_eq!(node.devices("lamps").unwrap().len(), 2);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn mode_changes_reach_the_bus() {
        let broker = MemoryConnector::new();
        let store = MemoryStore::new();
        let node = node(&broker, &store);

        node.start().await;
        node.offline().await;
        let bytes: Vec<_> = std::iter::from_fn(|| node.inner.bus.try_receive())
            .filter(|e| e.kind() == BusEventKind::ModeChanged)
            .map(|e| e.payload()[0])
            .collect();
        assert_eq!(
            bytes,
            vec![SystemMode::Boot.as_byte(), SystemMode::Offline.as_byte()]
        );
        node.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_driver_names_are_ignored() {
        let broker = MemoryConnector::new();
        let bus = EventBus::new();
        let router = MqttRouter::builder()
            .node_name("n")
            .connector(broker)
            .build()
            .unwrap();
        let node = Node::builder(NodeIdentity::new("n", "n"), router, bus, MemoryStore::new())
            .driver(lamp_driver())
            .driver(lamp_driver())
            .build();
        assert_eq!(node.driver_names(), vec!["lamps".to_string()]);
    }

    #[tokio::test]
    async fn oversized_remote_config_rejected() {
        let broker = MemoryConnector::new();
        let store = MemoryStore::new();
        let node = node(&broker, &store);
        node.start().await;

        let blob = vec![b' '; MAX_CONFIG_SIZE + 1];
        let err = node.apply_remote_config("lamps", &blob).await.unwrap_err();
        assert!(matches!(err, Error::Settings(SettingsError::TooLarge { .. })));
        assert_eq!(
            store.load_driver_config("lamps").unwrap(),
            Some(br#"{"count": 2}"#.to_vec())
        );

        let err = node.apply_remote_config("ghost", b"{}").await.unwrap_err();
        assert!(matches!(err, Error::DriverNotFound(name) if name == "ghost"));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn command_reaches_live_device() {
        let broker = MemoryConnector::new();
        let store = MemoryStore::new();
        let bus = EventBus::with_capacity(32);
        let router = MqttRouter::builder()
            .node_name("n")
            .connector(broker.clone())
            .bus(bus.clone())
            .build()
            .unwrap();

        struct Relay(Arc<Mutex<Vec<bool>>>);
        impl DriverHooks for Relay {
            fn on_init(&mut self, ctx: &DriverContext) -> Result<(), HookError> {
                let writes = Arc::clone(&self.0);
                ctx.add_device(Device::binary_switch("relay0", move |on| writes.lock().push(on)));
                Ok(())
            }
            fn run(&mut self, ctx: &DriverContext) {
                while ctx.sleep(Duration::from_millis(10)) {}
            }
        }

        let writes = Arc::new(Mutex::new(Vec::new()));
        let node = Node::builder(NodeIdentity::new("n", "n"), router.clone(), bus, store)
            .driver(Driver::new(DriverInfo::new("relay"), Relay(Arc::clone(&writes))))
            .build();
        node.start().await;
        router.connect().unwrap();
        router.handle_event(LinkEvent::Connected).await;
        node.online().await;

        router
            .handle_event(LinkEvent::Message(crate::protocol::Fragment::whole(
                1,
                "n/relay0/command",
                b"ON".to_vec(),
            )))
            .await;
        router
            .handle_event(LinkEvent::Message(crate::protocol::Fragment::whole(
                2,
                "n/relay0/command",
                b"maybe".to_vec(),
            )))
            .await;
        assert_eq!(writes.lock().as_slice(), &[true]);
        node.shutdown().await;
    }
}
