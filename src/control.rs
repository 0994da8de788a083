// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Main control loop.
//!
//! Consumes the system bus and translates connectivity changes into router
//! and node transitions:
//!
//! | Event                | Reaction                                   |
//! |----------------------|--------------------------------------------|
//! | `NetworkUp`          | drop any broker session, open a new one    |
//! | `BrokerConnected`    | node goes online                           |
//! | `BrokerDisconnected` | node goes offline                          |
//! | `NetworkDown`        | node goes offline, broker session closed   |
//! | `ModeChanged`        | logged                                     |

use std::time::Duration;

use crate::error::BusError;
use crate::event::{BusEvent, BusEventKind, EventBus};
use crate::node::{Node, SystemMode};
use crate::protocol::MqttRouter;

/// How long one loop iteration waits for an event.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// The task reacting to system events.
#[derive(Debug, Clone)]
pub struct ControlTask {
    bus: EventBus,
    router: MqttRouter,
    node: Node,
}

impl ControlTask {
    /// Creates the task. The router is the node's own.
    #[must_use]
    pub fn new(bus: EventBus, node: Node) -> Self {
        Self {
            bus,
            router: node.router().clone(),
            node,
        }
    }

    /// Runs until the bus is closed.
    pub async fn run(&self) {
        tracing::info!("Control task started");
        loop {
            match self.bus.receive(RECEIVE_TIMEOUT).await {
                Ok(event) => self.handle(&event).await,
                Err(BusError::Timeout(_)) => {}
                Err(BusError::Closed) => {
                    tracing::info!("Bus closed, control task ends");
                    return;
                }
                Err(e) => tracing::warn!(error = %e, "Bus receive failed"),
            }
        }
    }

    /// Reacts to one event.
    pub async fn handle(&self, event: &BusEvent) {
        tracing::debug!(kind = %event.kind(), "Handling bus event");
        match event.kind() {
            BusEventKind::NetworkUp => {
                if self.router.has_session() {
                    self.router.disconnect().await;
                }
                if let Err(e) = self.router.connect() {
                    tracing::error!(error = %e, "Broker connect failed, waiting for the next network up");
                }
            }
            BusEventKind::BrokerConnected => self.node.online().await,
            BusEventKind::BrokerDisconnected => self.node.offline().await,
            BusEventKind::NetworkDown => {
                self.node.offline().await;
                self.router.disconnect().await;
            }
            BusEventKind::ModeChanged => {
                match event.payload().first().copied().and_then(SystemMode::from_byte) {
                    Some(mode) => tracing::info!(mode = %mode, "System mode changed"),
                    None => tracing::warn!(payload = ?event.payload(), "Unknown system mode"),
                }
            }
        }
    }
}
