// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded event bus between system tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};

use super::{BusEvent, BusEventKind};
use crate::error::BusError;

/// Default number of events the bus can buffer.
pub const DEFAULT_BUS_CAPACITY: usize = 5;

/// Default time a producer waits for room on a saturated bus.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// Bounded queue carrying [`BusEvent`]s from producers to the control task.
///
/// The bus is cheaply cloneable; every clone shares the same queue. Any number
/// of tasks may send, one task is expected to receive.
///
/// # Capacity
///
/// The bus holds at most `capacity` events. A producer facing a full bus waits
/// up to the send timeout (500 ms by default) and then gets
/// [`BusError::Timeout`]; it never blocks indefinitely.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: mpsc::Sender<BusEvent>,
    receiver: Arc<Mutex<mpsc::Receiver<BusEvent>>>,
    send_timeout: Duration,
}

impl EventBus {
    /// Creates a new event bus with default capacity and send timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Creates a new event bus with the specified capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Sets how long producers wait for room on a saturated bus.
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// Sends an event, waiting up to the send timeout for room.
    ///
    /// # Errors
    ///
    /// - [`BusError::PayloadTooLarge`] if the payload exceeds the event buffer
    /// - [`BusError::Timeout`] if the bus stayed full for the whole wait
    /// - [`BusError::Closed`] if the receiving side is gone
    pub async fn send(&self, kind: BusEventKind, payload: &[u8]) -> Result<(), BusError> {
        let event = BusEvent::new(kind, payload).inspect_err(|e| {
            tracing::error!(kind = %kind, error = %e, "Event payload too big");
        })?;

        match self.sender.send_timeout(event, self.send_timeout).await {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                tracing::error!(kind = %kind, "Timeout while sending event");
                Err(BusError::Timeout(millis(self.send_timeout)))
            }
            Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(BusError::Closed),
        }
    }

    /// Sends an event without waiting.
    ///
    /// Suitable for contexts that must not suspend.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send), with [`BusError::Timeout`] reporting a
    /// zero wait when the bus is full.
    pub fn try_send(&self, kind: BusEventKind, payload: &[u8]) -> Result<(), BusError> {
        let event = BusEvent::new(kind, payload)?;
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => BusError::Timeout(0),
            mpsc::error::TrySendError::Closed(_) => BusError::Closed,
        })
    }

    /// Receives the next event, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Timeout`] if no event arrived in time. This is the
    /// normal "nothing happened this tick" outcome, not a failure.
    pub async fn receive(&self, timeout: Duration) -> Result<BusEvent, BusError> {
        let receive = async {
            let mut receiver = self.receiver.lock().await;
            receiver.recv().await
        };

        match tokio::time::timeout(timeout, receive).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) => Err(BusError::Closed),
            Err(_) => Err(BusError::Timeout(millis(timeout))),
        }
    }

    /// Takes the next event if one is queued and no receiver is waiting.
    #[must_use]
    pub fn try_receive(&self) -> Option<BusEvent> {
        self.receiver.try_lock().ok()?.try_recv().ok()
    }

    /// Returns the number of events currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Returns `true` if no event is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
