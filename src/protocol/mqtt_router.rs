// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The node's single broker connection and its subscription table.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{
    ConnectOptions, Connector, Link, LinkEvent, Message, MessageHandler, QoS, Reassembler,
    SubscribeOutcome, SubscriptionTable,
};
use crate::error::ProtocolError;
use crate::event::{BusEventKind, EventBus};

/// Maximum length of a topic, in bytes.
pub const MAX_TOPIC_LEN: usize = 128;

/// Capacity of the channel between a link and the pump task.
const LINK_EVENT_CAPACITY: usize = 64;

struct Session {
    link: Box<dyn Link>,
    pump: JoinHandle<()>,
}

struct RouterInner {
    node_name: String,
    options: ConnectOptions,
    connector: Arc<dyn Connector>,
    bus: Option<EventBus>,
    table: SubscriptionTable,
    reassembler: Mutex<Reassembler>,
    session: Mutex<Option<Session>>,
    connected: AtomicBool,
}

/// Pub/sub router owning the node's broker session.
///
/// Cheaply cloneable; all clones share the session and the subscription
/// table.
///
/// # Examples
///
/// ```
/// use iot_node::protocol::{LinkEvent, MemoryConnector, MqttRouter, QoS};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), iot_node::error::ProtocolError> {
/// let broker = MemoryConnector::new();
/// let router = MqttRouter::builder()
///     .node_name("greenhouse")
///     .connector(broker.clone())
///     .build()?;
///
/// router.subscribe("greenhouse/relay0/command", QoS::ExactlyOnce, "relay0", |msg| {
///     println!("command: {:?}", msg.payload_str());
/// })?;
///
/// router.connect()?;
/// router.handle_event(LinkEvent::Connected).await;
/// assert_eq!(broker.subscribed_topics(), vec!["greenhouse/relay0/command".to_string()]);
///
/// router.publish_subtopic("relay0/state", b"1", QoS::ExactlyOnce, true)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct MqttRouter {
    inner: Arc<RouterInner>,
}

impl std::fmt::Debug for MqttRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttRouter")
            .field("node_name", &self.inner.node_name)
            .field("host", &self.inner.options.host)
            .field("port", &self.inner.options.port)
            .field("connected", &self.is_connected())
            .field("subscriptions", &self.inner.table.len())
            .finish_non_exhaustive()
    }
}

impl MqttRouter {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> MqttRouterBuilder {
        MqttRouterBuilder::default()
    }

    /// Returns the node name every subtopic is scoped under.
    #[must_use]
    pub fn node_name(&self) -> &str {
        &self.inner.node_name
    }

    /// Returns `true` if a session exists, acknowledged or not.
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Returns `true` if the broker acknowledged the current session.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Opens a broker session.
    ///
    /// Does nothing if a session already exists. Must be called from within
    /// a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the connector cannot open the session.
    pub fn connect(&self) -> Result<(), ProtocolError> {
        let mut session = self.inner.session.lock();
        if session.is_some() {
            tracing::debug!("Broker session already open");
            return Ok(());
        }

        let (events_tx, events_rx) = mpsc::channel(LINK_EVENT_CAPACITY);
        let link = self
            .inner
            .connector
            .open(&self.inner.options, events_tx)
            .inspect_err(|e| tracing::error!(error = %e, "Could not open broker session"))?;
        let pump = tokio::spawn(pump_link_events(Arc::downgrade(&self.inner), events_rx));

        *session = Some(Session { link, pump });
        tracing::info!(
            host = %self.inner.options.host,
            port = self.inner.options.port,
            "Broker session opened"
        );
        Ok(())
    }

    /// Closes the broker session.
    ///
    /// Does nothing if there is no session. If the broker had acknowledged
    /// the session, `BrokerDisconnected` is raised on the bus.
    pub async fn disconnect(&self) {
        let Some(session) = self.inner.session.lock().take() else {
            tracing::debug!("No broker session to close");
            return;
        };

        let was_connected = self.inner.connected.swap(false, Ordering::AcqRel);
        self.inner.reassembler.lock().clear();
        if let Err(e) = session.link.close() {
            tracing::warn!(error = %e, "Error while closing broker session");
        }
        session.pump.abort();
        tracing::info!("Broker session closed");

        if was_connected {
            self.notify(BusEventKind::BrokerDisconnected).await;
        }
    }

    /// Publishes a message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NotConnected`] without a session, or the
    /// transport error if the request cannot be queued.
    pub fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), ProtocolError> {
        let session = self.inner.session.lock();
        let Some(session) = session.as_ref() else {
            tracing::debug!(topic = %topic, "Publish without broker session");
            return Err(ProtocolError::NotConnected);
        };
        tracing::trace!(topic = %topic, len = payload.len(), qos = qos.level(), retain, "Publishing");
        session.link.publish(topic, payload, qos, retain)
    }

    /// Serializes `value` as JSON and publishes it.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Json`] if serialization fails, otherwise as
    /// [`publish`](Self::publish).
    pub fn publish_json<T>(
        &self,
        topic: &str,
        value: &T,
        qos: QoS,
        retain: bool,
    ) -> Result<(), ProtocolError>
    where
        T: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(value)?;
        self.publish(topic, &payload, qos, retain)
    }

    /// Prefixes `relative` with the node name.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TopicTooLong`] if the composed topic exceeds
    /// [`MAX_TOPIC_LEN`].
    pub fn subtopic(&self, relative: &str) -> Result<String, ProtocolError> {
        let topic = format!("{}/{relative}", self.inner.node_name);
        check_topic(&topic)?;
        Ok(topic)
    }

    /// Publishes under the node name.
    ///
    /// # Errors
    ///
    /// As [`subtopic`](Self::subtopic) and [`publish`](Self::publish).
    pub fn publish_subtopic(
        &self,
        relative: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), ProtocolError> {
        let topic = self.subtopic(relative)?;
        self.publish(&topic, payload, qos, retain)
    }

    /// Registers `handler` for messages matching `topic`.
    ///
    /// `subscriber` identifies the interested party: registering the same
    /// (topic, subscriber) pair twice is a no-op. The broker is only asked
    /// for topics no other subscriber already watches, and only while
    /// connected; the rest is replayed when the session comes up.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TopicTooLong`] for oversized topics, or the
    /// transport error if the broker subscribe cannot be queued (the local
    /// entry is kept and replayed on reconnect).
    pub fn subscribe<F>(
        &self,
        topic: &str,
        qos: QoS,
        subscriber: &str,
        handler: F,
    ) -> Result<(), ProtocolError>
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        check_topic(topic)?;
        let handler: MessageHandler = Arc::new(handler);

        match self.inner.table.insert(topic, qos, subscriber, handler) {
            SubscribeOutcome::Duplicate => {
                tracing::debug!(topic = %topic, subscriber = %subscriber, "Already subscribed");
                Ok(())
            }
            SubscribeOutcome::SharedTopic => {
                tracing::debug!(topic = %topic, subscriber = %subscriber, "Joined existing subscription");
                Ok(())
            }
            SubscribeOutcome::NewTopic => {
                tracing::debug!(topic = %topic, subscriber = %subscriber, "Subscribed");
                if !self.is_connected() {
                    return Ok(());
                }
                match self.inner.session.lock().as_ref() {
                    Some(session) => session.link.subscribe(topic, qos),
                    None => Ok(()),
                }
            }
        }
    }

    /// Removes the (topic, subscriber) entry.
    ///
    /// The broker subscription is left in place. Returns `true` if an entry
    /// was removed.
    pub fn unsubscribe(&self, topic: &str, subscriber: &str) -> bool {
        let removed = self.inner.table.remove(topic, subscriber);
        if removed {
            tracing::debug!(topic = %topic, subscriber = %subscriber, "Unsubscribed");
        }
        removed
    }

    /// Returns the number of subscription entries.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.table.len()
    }

    /// Returns every distinct subscribed topic.
    #[must_use]
    pub fn distinct_topics(&self) -> Vec<String> {
        self.inner
            .table
            .distinct_topics()
            .into_iter()
            .map(|(topic, _)| topic)
            .collect()
    }

    /// Processes one transport event.
    ///
    /// Normally fed by the pump task of the session; exposed so embedders
    /// with their own transport loop can drive the router directly.
    pub async fn handle_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => {
                self.inner.connected.store(true, Ordering::Release);
                let replayed = self.replay_subscriptions();
                tracing::info!(topics = replayed, "Broker connected");
                self.notify(BusEventKind::BrokerConnected).await;
            }
            LinkEvent::Disconnected => {
                self.inner.connected.store(false, Ordering::Release);
                self.inner.reassembler.lock().clear();
                tracing::warn!("Broker connection lost");
                self.notify(BusEventKind::BrokerDisconnected).await;
            }
            LinkEvent::Message(fragment) => {
                let message = self.inner.reassembler.lock().push(fragment);
                if let Some(message) = message {
                    let delivered = self.inner.table.dispatch(&message);
                    tracing::debug!(topic = %message.topic, handlers = delivered, "Message dispatched");
                }
            }
        }
    }

    /// Issues one broker subscribe per distinct topic.
    fn replay_subscriptions(&self) -> usize {
        let topics = self.inner.table.distinct_topics();
        let session = self.inner.session.lock();
        let Some(session) = session.as_ref() else {
            return 0;
        };
        for (topic, qos) in &topics {
            if let Err(e) = session.link.subscribe(topic, *qos) {
                tracing::warn!(topic = %topic, error = %e, "Could not resubscribe");
            }
        }
        topics.len()
    }

    async fn notify(&self, kind: BusEventKind) {
        if let Some(bus) = &self.inner.bus
            && let Err(e) = bus.send(kind, &[]).await
        {
            tracing::warn!(kind = %kind, error = %e, "Could not raise bus event");
        }
    }
}

/// Feeds link events into the router until the link or the router goes away.
async fn pump_link_events(router: Weak<RouterInner>, mut events: mpsc::Receiver<LinkEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = router.upgrade() else {
            break;
        };
        MqttRouter { inner }.handle_event(event).await;
    }
}

fn check_topic(topic: &str) -> Result<(), ProtocolError> {
    if topic.len() > MAX_TOPIC_LEN {
        tracing::warn!(len = topic.len(), "Topic too long");
        return Err(ProtocolError::TopicTooLong {
            len: topic.len(),
            max: MAX_TOPIC_LEN,
        });
    }
    Ok(())
}

/// Builder for [`MqttRouter`].
#[derive(Default)]
pub struct MqttRouterBuilder {
    node_name: String,
    options: ConnectOptions,
    bus: Option<EventBus>,
    connector: Option<Arc<dyn Connector>>,
}

impl std::fmt::Debug for MqttRouterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttRouterBuilder")
            .field("node_name", &self.node_name)
            .field("options", &self.options)
            .field("bus", &self.bus.is_some())
            .field("connector", &self.connector.is_some())
            .finish()
    }
}

impl MqttRouterBuilder {
    /// Sets the node name used as topic prefix and default client id.
    #[must_use]
    pub fn node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = name.into();
        self
    }

    /// Sets the broker host address.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options.host = host.into();
        self
    }

    /// Sets the broker port (default: 1883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Sets authentication credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.options.credentials = Some((username.into(), password.into()));
        self
    }

    /// Sets the keep-alive interval (default: 30 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.options.keep_alive = duration;
        self
    }

    /// Sets the MQTT client id (default: the node name).
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.options.client_id = client_id.into();
        self
    }

    /// Sets the bus connection changes are reported on.
    #[must_use]
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sets the transport (default: `rumqttc` when the `mqtt` feature is on).
    #[must_use]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    /// Builds the router. No session is opened yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the node name is empty or leaves no room for
    /// subtopics, or if no transport is available.
    pub fn build(mut self) -> Result<MqttRouter, ProtocolError> {
        if self.node_name.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "node name is required".to_string(),
            ));
        }
        check_topic(&format!("{}/", self.node_name))?;
        if self.options.client_id.is_empty() {
            self.options.client_id.clone_from(&self.node_name);
        }

        let connector = match self.connector {
            Some(connector) => connector,
            None => default_connector()?,
        };

        Ok(MqttRouter {
            inner: Arc::new(RouterInner {
                node_name: self.node_name,
                options: self.options,
                connector,
                bus: self.bus,
                table: SubscriptionTable::new(),
                reassembler: Mutex::new(Reassembler::new()),
                session: Mutex::new(None),
                connected: AtomicBool::new(false),
            }),
        })
    }
}

#[cfg(feature = "mqtt")]
#[allow(clippy::unnecessary_wraps)]
fn default_connector() -> Result<Arc<dyn Connector>, ProtocolError> {
    Ok(Arc::new(super::RumqttConnector::new()))
}

#[cfg(not(feature = "mqtt"))]
fn default_connector() -> Result<Arc<dyn Connector>, ProtocolError> {
    Err(ProtocolError::ConnectionFailed(
        "no transport configured".to_string(),
    ))
}
