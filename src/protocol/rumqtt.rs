// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker transport backed by `rumqttc`.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{ConnectOptions, Connector, Fragment, Link, LinkEvent, QoS};
use crate::error::ProtocolError;

/// Delay before polling again after a connection error.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the rumqttc request queue.
const REQUEST_CAPACITY: usize = 64;

/// Opens sessions against a real MQTT broker.
///
/// Must be used from within a tokio runtime: each session spawns a task that
/// polls the `rumqttc` event loop. The event loop reconnects on its own after
/// a failure; every lost and regained session is reported as a
/// [`LinkEvent`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RumqttConnector;

impl RumqttConnector {
    /// Creates a connector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Connector for RumqttConnector {
    fn open(
        &self,
        options: &ConnectOptions,
        events: mpsc::Sender<LinkEvent>,
    ) -> Result<Box<dyn Link>, ProtocolError> {
        if options.host.is_empty() {
            return Err(ProtocolError::InvalidAddress(
                "MQTT broker host is required".to_string(),
            ));
        }

        let mut mqtt_options = MqttOptions::new(&options.client_id, &options.host, options.port);
        mqtt_options.set_keep_alive(options.keep_alive);
        mqtt_options.set_clean_session(true);
        if let Some((username, password)) = &options.credentials {
            mqtt_options.set_credentials(username, password);
        }

        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CAPACITY);
        let poller = tokio::spawn(poll_broker(event_loop, events));

        tracing::info!(host = %options.host, port = options.port, client_id = %options.client_id, "Opening MQTT session");
        Ok(Box::new(RumqttLink { client, poller }))
    }
}

struct RumqttLink {
    client: AsyncClient,
    poller: JoinHandle<()>,
}

impl Link for RumqttLink {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), ProtocolError> {
        self.client
            .try_publish(topic, qos.into(), retain, payload.to_vec())?;
        Ok(())
    }

    fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), ProtocolError> {
        self.client.try_subscribe(topic, qos.into())?;
        Ok(())
    }

    fn close(&self) -> Result<(), ProtocolError> {
        let result = self.client.try_disconnect();
        self.poller.abort();
        result.map_err(ProtocolError::from)
    }
}

impl Drop for RumqttLink {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

/// Polls the event loop and forwards what the router cares about.
///
/// Returns once the router stops listening.
async fn poll_broker(mut event_loop: EventLoop, events: mpsc::Sender<LinkEvent>) {
    let mut msg_id: u32 = 0;
    let mut connected = false;

    loop {
        let event = match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                tracing::debug!(?connack, "MQTT broker connected");
                connected = true;
                Some(LinkEvent::Connected)
            }
            Ok(Event::Incoming(Packet::SubAck(suback))) => {
                tracing::debug!(?suback, "MQTT subscription acknowledged");
                None
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                tracing::debug!(topic = %publish.topic, len = publish.payload.len(), "MQTT message received");
                msg_id = msg_id.wrapping_add(1);
                Some(LinkEvent::Message(Fragment::whole(
                    msg_id,
                    publish.topic,
                    publish.payload.to_vec(),
                )))
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                tracing::info!("MQTT broker disconnected");
                connected = false;
                Some(LinkEvent::Disconnected)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::error!(error = %e, "MQTT event loop error");
                let lost = std::mem::replace(&mut connected, false);
                if lost && events.send(LinkEvent::Disconnected).await.is_err() {
                    return;
                }
                tokio::time::sleep(RETRY_DELAY).await;
                None
            }
        };

        if let Some(event) = event
            && events.send(event).await.is_err()
        {
            tracing::debug!("Router stopped listening, ending MQTT poller");
            return;
        }
    }
}
