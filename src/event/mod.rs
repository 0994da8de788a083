// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! System event bus.
//!
//! The bus carries coarse signals (network up/down, broker connected or
//! disconnected, mode changes) between independent tasks. It is a bounded
//! queue: producers wait at most a fixed timeout when it is saturated, and
//! the single consumer (the control task) polls it with its own timeout.
//!
//! # Examples
//!
//! ```
//! use iot_node::event::{BusEventKind, EventBus};
//! use std::time::Duration;
//!
//! # async fn example() -> iot_node::Result<()> {
//! let bus = EventBus::new();
//! bus.send(BusEventKind::NetworkUp, &[]).await?;
//!
//! let event = bus.receive(Duration::from_secs(1)).await?;
//! assert_eq!(event.kind(), BusEventKind::NetworkUp);
//! # Ok(())
//! # }
//! ```

mod bus_event;
mod event_bus;

pub use bus_event::{BUS_EVENT_DATA_SIZE, BusEvent, BusEventKind};
pub use event_bus::{DEFAULT_BUS_CAPACITY, DEFAULT_SEND_TIMEOUT, EventBus};
