// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the node control plane.
//!
//! Each subsystem has its own error enum so callers can tell the failure
//! classes apart: illegal driver transitions, handshake timeouts, resource
//! exhaustion, broker transport failures and settings storage problems.
//! Argument problems (malformed config fields) never surface as errors; the
//! config accessors degrade to defaults instead.

use thiserror::Error;

use crate::driver::DriverState;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Error raised by the system event bus.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    /// Error raised by the broker connection or the subscription table.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Error raised by a driver lifecycle operation.
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Error raised by the settings store.
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    /// No driver with the given name is registered.
    #[error("driver not found: {0}")]
    DriverNotFound(String),
}

/// Errors raised by the system event bus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The event payload does not fit into the fixed event buffer.
    #[error("event payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Maximum payload size.
        max: usize,
    },

    /// The bus stayed saturated (send) or empty (receive) for the whole wait.
    #[error("bus operation timed out after {0} ms")]
    Timeout(u64),

    /// Every sender or the receiver has been dropped.
    #[error("bus is closed")]
    Closed,
}

/// Errors raised by driver lifecycle operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The operation is not legal from the driver's current state.
    #[error("driver {driver} cannot {operation} from state {state}")]
    InvalidState {
        /// Driver name.
        driver: String,
        /// The rejected operation.
        operation: &'static str,
        /// State the driver was in.
        state: DriverState,
    },

    /// The driver thread did not answer the handshake in time.
    #[error("driver {driver} did not complete {operation} within {timeout_ms} ms")]
    Timeout {
        /// Driver name.
        driver: String,
        /// The operation that timed out.
        operation: &'static str,
        /// The handshake bound.
        timeout_ms: u64,
    },

    /// A driver hook reported a failure (or panicked).
    #[error("driver {driver} failed during {operation}")]
    HookFailed {
        /// Driver name.
        driver: String,
        /// The operation whose hook failed.
        operation: &'static str,
    },

    /// The driver thread could not be created.
    #[error("could not spawn thread for driver {driver}: {source}")]
    Spawn {
        /// Driver name.
        driver: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Error returned by a driver hook.
///
/// Hooks describe what went wrong; the framework turns it into a
/// [`DriverError::HookFailed`] and logs the message with the driver name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    /// Creates a hook error from any displayable message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors related to the broker connection and topic handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The MQTT client rejected a request.
    #[cfg(feature = "mqtt")]
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Opening a broker session failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// There is no broker session.
    #[error("not connected to the broker")]
    NotConnected,

    /// The broker address is invalid.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A composed topic exceeds the maximum topic length.
    #[error("topic of {len} bytes exceeds the {max} byte limit")]
    TopicTooLong {
        /// Length of the rejected topic.
        len: usize,
        /// Maximum topic length.
        max: usize,
    },

    /// A JSON payload could not be serialized.
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal channel was closed.
    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

/// Errors raised when a remote command cannot be applied to a device.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CommandError {
    /// The device is read-only.
    #[error("device {0} does not accept commands")]
    NotWritable(String),

    /// The payload could not be parsed for this device kind.
    #[error("invalid command payload: {0}")]
    InvalidPayload(String),

    /// A numeric command lies outside the device bounds.
    #[error("value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        /// Lower bound.
        min: f32,
        /// Upper bound.
        max: f32,
        /// The rejected value.
        value: f32,
    },
}

/// Errors related to persistent settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Reading or writing the backing storage failed.
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A stored document could not be (de)serialized.
    #[error("invalid settings document: {0}")]
    Json(#[from] serde_json::Error),

    /// A blob is larger than the store accepts.
    #[error("blob of {size} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Size of the rejected blob.
        size: usize,
        /// Maximum blob size.
        max: usize,
    },
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_error_display() {
        let err = BusError::PayloadTooLarge { size: 80, max: 64 };
        assert_eq!(
            err.to_string(),
            "event payload of 80 bytes exceeds the 64 byte limit"
        );
    }

    #[test]
    fn invalid_state_display() {
        let err = DriverError::InvalidState {
            driver: "relays".to_string(),
            operation: "start",
            state: DriverState::New,
        };
        assert_eq!(err.to_string(), "driver relays cannot start from state NEW");
    }

    #[test]
    fn timeout_display() {
        let err = DriverError::Timeout {
            driver: "aht".to_string(),
            operation: "init",
            timeout_ms: 1000,
        };
        assert_eq!(
            err.to_string(),
            "driver aht did not complete init within 1000 ms"
        );
    }

    #[test]
    fn error_from_bus_error() {
        let err: Error = BusError::Closed.into();
        assert!(matches!(err, Error::Bus(BusError::Closed)));
    }

    #[test]
    fn topic_too_long_display() {
        let err = ProtocolError::TopicTooLong { len: 130, max: 128 };
        assert_eq!(err.to_string(), "topic of 130 bytes exceeds the 128 byte limit");
    }
}
