// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory transport recording broker traffic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ConnectOptions, Connector, Fragment, Link, LinkEvent, QoS};
use crate::error::ProtocolError;

/// An operation a link issued towards the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerOp {
    /// A publish request.
    Publish {
        /// Topic.
        topic: String,
        /// Payload.
        payload: Vec<u8>,
        /// Requested QoS.
        qos: QoS,
        /// Retain flag.
        retain: bool,
    },
    /// A subscribe request.
    Subscribe {
        /// Topic filter.
        topic: String,
        /// Requested QoS.
        qos: QoS,
    },
    /// The session was closed.
    Close,
}

#[derive(Debug, Default)]
struct State {
    ops: Vec<BrokerOp>,
    events: Option<mpsc::Sender<LinkEvent>>,
    sessions: usize,
    next_msg_id: u32,
}

/// Connector whose sessions live in memory.
///
/// Every clone shares the same record, so a test can hand one clone to the
/// router and inspect the traffic through another.
///
/// # Examples
///
/// ```
/// use iot_node::protocol::{BrokerOp, Connector, ConnectOptions, MemoryConnector, QoS};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), iot_node::error::ProtocolError> {
/// let connector = MemoryConnector::new();
/// let (tx, _rx) = tokio::sync::mpsc::channel(8);
/// let link = connector.open(&ConnectOptions::default(), tx)?;
///
/// link.subscribe("node/+/command", QoS::ExactlyOnce)?;
/// assert_eq!(connector.subscribed_topics(), vec!["node/+/command".to_string()]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<State>>,
    auto_connect: bool,
    refuse: Arc<AtomicBool>,
}

impl MemoryConnector {
    /// Creates a connector. Sessions stay unacknowledged until
    /// [`connected`](Self::connected) is called.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every new session report `Connected` immediately.
    #[must_use]
    pub fn with_auto_connect(mut self) -> Self {
        self.auto_connect = true;
        self
    }

    /// Makes subsequent `open` calls fail (or succeed again).
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Release);
    }

    /// Returns every recorded operation.
    #[must_use]
    pub fn ops(&self) -> Vec<BrokerOp> {
        self.state.lock().ops.clone()
    }

    /// Forgets every recorded operation.
    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    /// Returns the topic of every subscribe request, in order.
    #[must_use]
    pub fn subscribed_topics(&self) -> Vec<String> {
        self.state
            .lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                BrokerOp::Subscribe { topic, .. } => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    /// Returns every publish request as (topic, payload, qos, retain).
    #[must_use]
    pub fn published(&self) -> Vec<(String, Vec<u8>, QoS, bool)> {
        self.state
            .lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                BrokerOp::Publish {
                    topic,
                    payload,
                    qos,
                    retain,
                } => Some((topic.clone(), payload.clone(), *qos, *retain)),
                _ => None,
            })
            .collect()
    }

    /// Returns the payloads published on `topic`, in order.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.published()
            .into_iter()
            .filter(|(t, ..)| t == topic)
            .map(|(_, payload, ..)| payload)
            .collect()
    }

    /// Returns the number of sessions opened so far.
    #[must_use]
    pub fn sessions(&self) -> usize {
        self.state.lock().sessions
    }

    /// Reports an event on the latest session.
    ///
    /// Returns `false` if no session is listening.
    pub async fn inject(&self, event: LinkEvent) -> bool {
        let events = self.state.lock().events.clone();
        match events {
            Some(events) => events.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Reports that the broker accepted the latest session.
    pub async fn connected(&self) -> bool {
        self.inject(LinkEvent::Connected).await
    }

    /// Reports that the latest session was lost.
    pub async fn disconnected(&self) -> bool {
        self.inject(LinkEvent::Disconnected).await
    }

    /// Delivers a whole message on the latest session.
    pub async fn deliver(&self, topic: &str, payload: &[u8]) -> bool {
        let msg_id = {
            let mut state = self.state.lock();
            state.next_msg_id = state.next_msg_id.wrapping_add(1);
            state.next_msg_id
        };
        self.inject(LinkEvent::Message(Fragment::whole(
            msg_id,
            topic,
            payload.to_vec(),
        )))
        .await
    }
}

impl Connector for MemoryConnector {
    fn open(
        &self,
        options: &ConnectOptions,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Box<dyn Link>, ProtocolError> {
        if self.refuse.load(Ordering::Acquire) {
            return Err(ProtocolError::ConnectionFailed(format!(
                "{}:{} refused the session",
                options.host, options.port
            )));
        }

        if self.auto_connect && events.try_send(LinkEvent::Connected).is_err() {
            return Err(ProtocolError::ChannelClosed("link events".to_string()));
        }

        let mut state = self.state.lock();
        state.sessions += 1;
        state.events = Some(events);
        Ok(Box::new(MemoryLink {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug)]
struct MemoryLink {
    state: Arc<Mutex<State>>,
    closed: AtomicBool,
}

impl MemoryLink {
    fn record(&self, op: BrokerOp) -> Result<(), ProtocolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ProtocolError::NotConnected);
        }
        self.state.lock().ops.push(op);
        Ok(())
    }
}

impl Link for MemoryLink {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), ProtocolError> {
        self.record(BrokerOp::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        })
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError> {
        self.record(BrokerOp::Subscribe {
            topic: topic.to_string(),
            qos,
        })
    }

    fn close(&self) -> Result<(), ProtocolError> {
        self.record(BrokerOp::Close)?;
        self.closed.store(true, Ordering::Release);
        self.state.lock().events = None;
        Ok(())
    }
}
