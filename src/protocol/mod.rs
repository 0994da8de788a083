// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pub/sub routing over a single broker connection.
//!
//! The [`MqttRouter`] owns the broker session of the node and multiplexes it
//! across every interested party:
//!
//! ```text
//! Connector::open ──▶ Link (publish / subscribe / close)
//!        │
//!        └── LinkEvent channel ──▶ pump task ──▶ MqttRouter::handle_event
//!                                                  ├─ Connected    → replay subscriptions, bus event
//!                                                  ├─ Disconnected → bus event
//!                                                  └─ Message      → reassemble → matching handlers
//! ```
//!
//! The transport sits behind the [`Connector`] and [`Link`] traits. With the
//! `mqtt` feature (on by default) [`RumqttConnector`] talks to a real broker
//! through `rumqttc`; [`MemoryConnector`] records every operation in memory
//! and lets callers inject broker events.

mod memory;
mod mqtt_router;
mod reassembly;
#[cfg(feature = "mqtt")]
mod rumqtt;
mod topic_router;

pub use memory::{BrokerOp, MemoryConnector};
pub use mqtt_router::{MAX_TOPIC_LEN, MqttRouter, MqttRouterBuilder};
pub use reassembly::Reassembler;
#[cfg(feature = "mqtt")]
pub use rumqtt::RumqttConnector;
pub use topic_router::{MessageHandler, SubscribeOutcome, SubscriptionTable, topic_matches};

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::ProtocolError;

/// Delivery guarantee of a publish or subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce,
    /// Acknowledged delivery, duplicates possible.
    AtLeastOnce,
    /// Exactly one delivery.
    ExactlyOnce,
}

impl QoS {
    /// Returns the numeric level (0, 1 or 2).
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

#[cfg(feature = "mqtt")]
impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => Self::AtMostOnce,
            QoS::AtLeastOnce => Self::AtLeastOnce,
            QoS::ExactlyOnce => Self::ExactlyOnce,
        }
    }
}

/// A complete inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Topic the message was published on.
    pub topic: String,
    /// Message body.
    pub payload: Vec<u8>,
}

impl Message {
    /// Returns the payload as text, if it is valid UTF-8.
    #[must_use]
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// One piece of an inbound message.
///
/// Large messages may arrive split into several fragments sharing a message
/// id. Only the first fragment (offset 0) carries the topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Identifier shared by every fragment of a message.
    pub msg_id: u32,
    /// Topic, present on the first fragment.
    pub topic: Option<String>,
    /// Position of `data` within the full payload.
    pub offset: usize,
    /// Length of the full payload.
    pub total_len: usize,
    /// Fragment bytes.
    pub data: Vec<u8>,
}

impl Fragment {
    /// Creates a fragment holding a whole message.
    #[must_use]
    pub fn whole(msg_id: u32, topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            msg_id,
            topic: Some(topic.into()),
            offset: 0,
            total_len: payload.len(),
            data: payload,
        }
    }
}

/// Events a transport reports to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The broker accepted the session.
    Connected,
    /// The broker session was lost.
    Disconnected,
    /// Message data arrived.
    Message(Fragment),
}

/// Parameters of a broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// MQTT client identifier.
    pub client_id: String,
    /// Username and password.
    pub credentials: Option<(String, String)>,
    /// Keep-alive interval.
    pub keep_alive: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 1883,
            client_id: String::new(),
            credentials: None,
            keep_alive: Duration::from_secs(30),
        }
    }
}

/// An open broker session.
///
/// Operations only enqueue requests; they never wait for the broker.
pub trait Link: Send + Sync {
    /// Publishes a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be queued.
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool)
    -> Result<(), ProtocolError>;

    /// Subscribes to a topic filter.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be queued.
    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError>;

    /// Closes the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be queued.
    fn close(&self) -> Result<(), ProtocolError>;
}

/// Opens broker sessions.
pub trait Connector: Send + Sync {
    /// Opens a session, reporting its events into `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be set up.
    fn open(
        &self,
        options: &ConnectOptions,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Box<dyn Link>, ProtocolError>;
}
