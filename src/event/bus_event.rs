// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bus event types.

use crate::error::BusError;

/// Maximum number of payload bytes an event can carry.
pub const BUS_EVENT_DATA_SIZE: usize = 64;

/// Kinds of system events carried by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusEventKind {
    /// The network link came up.
    NetworkUp,
    /// The network link went down.
    NetworkDown,
    /// A broker session was established.
    BrokerConnected,
    /// The broker session was lost.
    BrokerDisconnected,
    /// The node switched to another system mode.
    ModeChanged,
}

impl std::fmt::Display for BusEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NetworkUp => "network-up",
            Self::NetworkDown => "network-down",
            Self::BrokerConnected => "broker-connected",
            Self::BrokerDisconnected => "broker-disconnected",
            Self::ModeChanged => "mode-changed",
        };
        f.write_str(name)
    }
}

/// A system event with a small fixed-size opaque payload.
///
/// Events are plain values: the payload is copied into the event when it is
/// created, so the producer's buffer can be reused immediately.
///
/// # Examples
///
/// ```
/// use iot_node::event::{BusEvent, BusEventKind};
///
/// let event = BusEvent::new(BusEventKind::ModeChanged, &[3]).unwrap();
/// assert_eq!(event.payload(), &[3]);
///
/// let too_big = [0u8; 65];
/// assert!(BusEvent::new(BusEventKind::ModeChanged, &too_big).is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BusEvent {
    kind: BusEventKind,
    data: [u8; BUS_EVENT_DATA_SIZE],
    len: usize,
}

impl BusEvent {
    /// Creates an event, copying `payload` into the fixed buffer.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PayloadTooLarge`] if the payload exceeds
    /// [`BUS_EVENT_DATA_SIZE`].
    pub fn new(kind: BusEventKind, payload: &[u8]) -> Result<Self, BusError> {
        if payload.len() > BUS_EVENT_DATA_SIZE {
            return Err(BusError::PayloadTooLarge {
                size: payload.len(),
                max: BUS_EVENT_DATA_SIZE,
            });
        }

        let mut data = [0u8; BUS_EVENT_DATA_SIZE];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            kind,
            data,
            len: payload.len(),
        })
    }

    /// Creates an event without payload.
    #[must_use]
    pub fn signal(kind: BusEventKind) -> Self {
        Self {
            kind,
            data: [0u8; BUS_EVENT_DATA_SIZE],
            len: 0,
        }
    }

    /// Returns the event kind.
    #[must_use]
    pub fn kind(&self) -> BusEventKind {
        self.kind
    }

    /// Returns the payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl std::fmt::Debug for BusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusEvent")
            .field("kind", &self.kind)
            .field("payload", &self.payload())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_copied() {
        let mut buf = [1u8, 2, 3];
        let event = BusEvent::new(BusEventKind::NetworkUp, &buf).unwrap();
        buf[0] = 9;
        assert_eq!(event.payload(), &[1, 2, 3]);
    }

    #[test]
    fn payload_at_limit_is_accepted() {
        let buf = [7u8; BUS_EVENT_DATA_SIZE];
        let event = BusEvent::new(BusEventKind::NetworkUp, &buf).unwrap();
        assert_eq!(event.payload().len(), BUS_EVENT_DATA_SIZE);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let buf = [0u8; BUS_EVENT_DATA_SIZE + 1];
        let err = BusEvent::new(BusEventKind::NetworkUp, &buf).unwrap_err();
        assert_eq!(
            err,
            BusError::PayloadTooLarge {
                size: BUS_EVENT_DATA_SIZE + 1,
                max: BUS_EVENT_DATA_SIZE
            }
        );
    }

    #[test]
    fn signal_has_empty_payload() {
        let event = BusEvent::signal(BusEventKind::BrokerConnected);
        assert_eq!(event.kind(), BusEventKind::BrokerConnected);
        assert!(event.payload().is_empty());
    }

    #[test]
    fn kind_display() {
        assert_eq!(BusEventKind::BrokerDisconnected.to_string(), "broker-disconnected");
    }
}
