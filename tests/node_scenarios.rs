// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end node scenarios over the in-memory broker.

use std::time::Duration;

use iot_node::device::Device;
use iot_node::driver::{Driver, DriverContext, DriverHooks, DriverInfo, DriverState, Flag};
use iot_node::error::HookError;
use iot_node::protocol::{BrokerOp, MemoryConnector, QoS};
use iot_node::{ControlTask, EventBus, MemoryStore, MqttRouter, Node, NodeIdentity, SettingsStore, SystemMode};

/// Sensors `temp0..tempN`; raising `drop_first` removes `temp0`.
struct Probe {
    drop_first: Flag,
}

impl DriverHooks for Probe {
    fn on_init(&mut self, ctx: &DriverContext) -> Result<(), HookError> {
        for i in 0..ctx.config().get_int("sensors", 1) {
            ctx.add_device(Device::sensor(format!("temp{i}"), "°C", 1));
        }
        Ok(())
    }

    fn run(&mut self, ctx: &DriverContext) {
        while ctx.is_running() {
            if self.drop_first.wait_take(Duration::from_millis(20)) {
                ctx.remove_device("temp0");
            }
        }
    }
}

struct Harness {
    broker: MemoryConnector,
    store: MemoryStore,
    bus: EventBus,
    router: MqttRouter,
    node: Node,
    drop_first: Flag,
}

fn harness() -> Harness {
    let broker = MemoryConnector::new();
    let store = MemoryStore::new();
    let bus = EventBus::with_capacity(32);
    let router = MqttRouter::builder()
        .node_name("n")
        .connector(broker.clone())
        .bus(bus.clone())
        .build()
        .unwrap();
    let drop_first = Flag::new();

    let node = Node::builder(
        NodeIdentity::new("n", "sys1"),
        router.clone(),
        bus.clone(),
        store.clone(),
    )
    .driver(Driver::new(
        DriverInfo::new("probe").with_default_config(r#"{"sensors": 2}"#),
        Probe {
            drop_first: drop_first.clone(),
        },
    ))
    .driver(iot_node::drivers::relays::driver())
    .build();

    Harness {
        broker,
        store,
        bus,
        router,
        node,
        drop_first,
    }
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..150 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn connect(h: &Harness) {
    h.router.connect().unwrap();
    h.router.handle_event(iot_node::protocol::LinkEvent::Connected).await;
}

#[tokio::test]
async fn boot_without_persisted_config() {
    let h = harness();
    h.node.start().await;

    assert_eq!(h.node.mode(), SystemMode::Offline);
    assert_eq!(
        h.store.load_driver_config("probe").unwrap(),
        Some(br#"{"sensors": 2}"#.to_vec())
    );
    assert_eq!(
        h.store.load_driver_config("relays").unwrap(),
        Some(br#"{"count": 4}"#.to_vec())
    );
    assert_eq!(h.node.driver_state("probe").await, Some(DriverState::Initialized));
    assert_eq!(h.node.driver_state("relays").await, Some(DriverState::Initialized));
    h.node.shutdown().await;
}

#[tokio::test]
async fn persisted_config_wins_over_default() {
    let h = harness();
    h.store.save_driver_config("probe", br#"{"sensors": 5}"#).unwrap();
    h.node.start().await;
    assert_eq!(h.node.devices("probe").unwrap().len(), 5);
    h.node.shutdown().await;
}

#[tokio::test]
async fn going_online_announces_everything_once() {
    let h = harness();
    h.node.start().await;
    connect(&h).await;

    h.node.online().await;
    assert_eq!(h.node.driver_state("probe").await, Some(DriverState::Running));
    assert_eq!(
        h.broker.published_on("n/drivers/probe/state"),
        vec![b"RUNNING".to_vec()]
    );
    assert_eq!(
        h.broker.published_on("n/drivers/relays/config"),
        vec![br#"{"count":4}"#.to_vec()]
    );

    let discovery = h.broker.published_on("homeassistant/sensor/n/temp0/config");
    assert_eq!(discovery.len(), 1);
    let descriptor: serde_json::Value = serde_json::from_slice(&discovery[0]).unwrap();
    assert_eq!(descriptor["unique_id"], "n_temp0");
    assert_eq!(descriptor["state_topic"], "n/temp0/state");

    let subscribed = h.broker.subscribed_topics();
    assert!(subscribed.contains(&"n/relay0/command".to_string()));
    assert!(subscribed.contains(&"n/drivers/probe/set_config".to_string()));
    assert!(!subscribed.contains(&"n/temp0/command".to_string()));

    let switch_state = h
        .broker
        .published()
        .into_iter()
        .find(|(topic, ..)| topic == "n/relay0/state")
        .unwrap();
    assert_eq!(switch_state.1, b"0");
    assert_eq!(switch_state.2, QoS::ExactlyOnce);
    assert!(switch_state.3);

    let ops = h.broker.ops().len();
    h.node.online().await;
    assert_eq!(h.broker.ops().len(), ops);
    h.node.shutdown().await;
}

#[tokio::test]
async fn remote_config_push_while_online() {
    let h = harness();
    h.node.start().await;
    connect(&h).await;
    h.node.online().await;

    assert!(h.broker.deliver("n/drivers/probe/set_config", br#"{"sensors": 3}"#).await);
    eventually("third sensor announced", || {
        !h.broker
            .published_on("homeassistant/sensor/n/temp2/config")
            .is_empty()
    })
    .await;

    assert_eq!(
        h.store.load_driver_config("probe").unwrap(),
        Some(br#"{"sensors": 3}"#.to_vec())
    );
    assert_eq!(h.node.driver_state("probe").await, Some(DriverState::Running));
    assert_eq!(
        h.broker.published_on("n/drivers/probe/config").last(),
        Some(&br#"{"sensors":3}"#.to_vec())
    );

    assert!(h.broker.deliver("n/drivers/probe/set_config", br#"{"sensors": 1}"#).await);
    eventually("dropped sensors withdrawn", || {
        h.broker
            .published_on("homeassistant/sensor/n/temp2/config")
            .last()
            .is_some_and(Vec::is_empty)
    })
    .await;
    assert_eq!(h.node.devices("probe").unwrap().len(), 1);
    h.node.shutdown().await;
}

#[tokio::test]
async fn offline_node_drops_device_events() {
    let h = harness();
    h.node.start().await;
    connect(&h).await;
    h.node.online().await;
    h.node.offline().await;
    h.broker.clear_ops();

    let relays = h.node.devices("relays").unwrap();
    relays.get("relay2").unwrap().apply_command(b"1").unwrap();
    eventually("relay switched", || {
        relays.get("relay2").and_then(|d| d.bool_value()) == Some(true)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.broker.published().is_empty());

    h.node.online().await;
    assert_eq!(h.broker.published_on("n/relay2/state"), vec![b"1".to_vec()]);
    h.node.shutdown().await;
}

#[tokio::test]
async fn command_over_broker_updates_state() {
    let h = harness();
    h.node.start().await;
    connect(&h).await;
    h.node.online().await;
    h.broker.clear_ops();

    assert!(h.broker.deliver("n/relay1/command", b"on").await);
    eventually("relay state published", || {
        h.broker.published_on("n/relay1/state") == vec![b"1".to_vec()]
    })
    .await;
    eventually("aggregate sensor published", || {
        h.broker.published_on("n/any_on/state") == vec![b"1".to_vec()]
    })
    .await;
    h.node.shutdown().await;
}

#[tokio::test]
async fn removed_device_is_withdrawn() {
    let h = harness();
    h.node.start().await;
    connect(&h).await;
    h.node.online().await;

    h.drop_first.raise();
    eventually("empty discovery for temp0", || {
        h.broker
            .published_on("homeassistant/sensor/n/temp0/config")
            .last()
            .is_some_and(Vec::is_empty)
    })
    .await;
    assert!(h.node.devices("probe").unwrap().get("temp0").is_none());
    h.node.shutdown().await;
}

#[tokio::test]
async fn reconnect_replays_subscriptions_and_reannounces() {
    let h = harness();
    h.node.start().await;
    let control = ControlTask::new(h.bus.clone(), h.node.clone());
    let task = tokio::spawn({
        let control = control.clone();
        async move { control.run().await }
    });
    let mut mode = h.node.watch_mode();

    h.bus
        .send(iot_node::BusEventKind::NetworkUp, &[])
        .await
        .unwrap();
    eventually("session opened", || h.router.has_session()).await;
    assert!(h.broker.connected().await);
    tokio::time::timeout(Duration::from_secs(3), mode.wait_for(|m| *m == SystemMode::Online))
        .await
        .unwrap()
        .unwrap();
    // set_config for both drivers, one command topic per relay
    eventually("subscriptions registered", || h.router.subscription_count() == 6).await;
    let topics = h.router.distinct_topics();

    assert!(h.broker.disconnected().await);
    tokio::time::timeout(Duration::from_secs(3), mode.wait_for(|m| *m == SystemMode::Offline))
        .await
        .unwrap()
        .unwrap();

    h.broker.clear_ops();
    assert!(h.broker.connected().await);
    tokio::time::timeout(Duration::from_secs(3), mode.wait_for(|m| *m == SystemMode::Online))
        .await
        .unwrap()
        .unwrap();
    eventually("discovery republished", || {
        !h.broker
            .published_on("homeassistant/switch/n/relay0/config")
            .is_empty()
    })
    .await;

    let replayed: Vec<_> = h
        .broker
        .ops()
        .into_iter()
        .filter_map(|op| match op {
            BrokerOp::Subscribe { topic, .. } => Some(topic),
            _ => None,
        })
        .take(topics.len())
        .collect();
    assert_eq!(replayed, topics);

    task.abort();
    h.node.shutdown().await;
}
