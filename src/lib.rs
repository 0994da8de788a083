// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `iot_node` - control plane of a sensor/actuator node.
//!
//! A node reads sensors and drives actuators through *drivers*, and exposes
//! their *devices* to a home-automation hub over MQTT with Home Assistant
//! discovery.
//!
//! # Architecture
//!
//! ```text
//!                 ┌──────────────┐  BusEvent   ┌──────────────┐
//!   network ────▶ │   EventBus   │ ──────────▶ │ ControlTask  │
//!   router  ────▶ │ (bounded, 5) │             └──────┬───────┘
//!   node    ────▶ └──────────────┘         online / offline / connect
//!                                                     │
//!   ┌────────────┐  DriverEvent  ┌──────────┐         ▼
//!   │ driver     │ ────────────▶ │   Node   │ ──▶ MqttRouter ──▶ broker
//!   │ threads    │ ◀──────────── │          │ ◀── commands, set_config
//!   └────────────┘  init/start/  └──────────┘
//!                   stop/reset
//! ```
//!
//! - [`driver`]: lifecycle state machine, one OS thread per driver
//! - [`event`]: the bounded system bus
//! - [`protocol`]: broker session, subscription table, fragment reassembly
//! - [`device`]: endpoint model and discovery descriptors
//! - [`node`]: driver registry and online/offline policy
//! - [`control`]: the loop reacting to bus events
//! - [`settings`]: persisted node settings and driver configs
//! - [`drivers`]: built-in hardware-free drivers
//!
//! # Quick Start
//!
//! ```
//! use iot_node::device::NodeIdentity;
//! use iot_node::event::EventBus;
//! use iot_node::node::{Node, SystemMode};
//! use iot_node::protocol::{MemoryConnector, MqttRouter};
//! use iot_node::settings::MemoryStore;
//!
//! # #[tokio::main(flavor = "multi_thread")]
//! # async fn main() -> iot_node::Result<()> {
//! let bus = EventBus::new();
//! let router = MqttRouter::builder()
//!     .node_name("greenhouse")
//!     .connector(MemoryConnector::new())
//!     .bus(bus.clone())
//!     .build()?;
//!
//! let mut builder = Node::builder(
//!     NodeIdentity::new("greenhouse", "a1b2c3"),
//!     router,
//!     bus,
//!     MemoryStore::new(),
//! );
//! for driver in iot_node::drivers::builtin() {
//!     builder = builder.driver(driver);
//! }
//! let node = builder.build();
//!
//! node.start().await;
//! assert_eq!(node.mode(), SystemMode::Offline);
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod control;
pub mod device;
pub mod driver;
pub mod drivers;
pub mod error;
pub mod event;
pub mod node;
pub mod protocol;
pub mod settings;

pub use control::ControlTask;
pub use device::{Device, DeviceKind, NodeIdentity};
pub use driver::{Driver, DriverContext, DriverHooks, DriverInfo, DriverState};
pub use error::{Error, Result};
pub use event::{BusEvent, BusEventKind, EventBus};
pub use node::{Node, SystemMode};
pub use protocol::{MqttRouter, QoS};
pub use settings::{FileStore, MemoryStore, NodeSettings, SettingsStore};
