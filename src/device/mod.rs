// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device model.
//!
//! A [`Device`] is one endpoint a driver exposes to the home-automation hub:
//! a sensor reading, a binary input, a bounded numeric output or a switch.
//! The kind-specific payload lives in [`DeviceKind`], so the kind tag and its
//! data can never disagree.
//!
//! Devices are plain values. Drivers keep the live copies in a [`DeviceSet`]
//! and every change notification carries its own clone, which stays valid no
//! matter how the driver mutates the device afterwards.
//!
//! # Examples
//!
//! ```
//! use iot_node::device::{Device, DeviceType};
//!
//! let mut temperature = Device::sensor("t0", "°C", 1)
//!     .with_name("Greenhouse temperature")
//!     .with_device_class("temperature");
//!
//! temperature.set_float(21.46);
//! assert_eq!(temperature.state_payload(), "21.5");
//! assert_eq!(temperature.device_type(), DeviceType::Sensor);
//!
//! let relay = Device::binary_switch("relay0", |on| println!("relay -> {on}"));
//! assert!(relay.is_writable());
//! ```

mod discovery;
mod set;

pub use discovery::{
    DISCOVERY_PREFIX, DeviceBlock, DiscoveryDescriptor, NodeIdentity, command_topic,
    discovery_topic, state_topic,
};
pub use set::DeviceSet;

use std::sync::Arc;
use std::time::Duration;

use crate::error::CommandError;
use crate::protocol::QoS;

/// Callback invoked when the hub writes a new value to a device.
pub type WriteCallback<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Device type, as advertised to the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Numeric reading.
    Sensor,
    /// Boolean reading.
    BinarySensor,
    /// Bounded numeric output.
    Number,
    /// Boolean output.
    BinarySwitch,
}

impl DeviceType {
    /// Returns the Home Assistant component name used in discovery topics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sensor => "sensor",
            Self::BinarySensor => "binary_sensor",
            Self::Number => "number",
            Self::BinarySwitch => "switch",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific device payload.
#[derive(Clone)]
pub enum DeviceKind {
    /// Numeric reading.
    Sensor {
        /// Last measured value.
        value: f32,
        /// Number of decimals published.
        precision: usize,
        /// Unit of measurement.
        unit: String,
        /// How often the driver refreshes the value.
        update_period: Option<Duration>,
    },
    /// Boolean reading.
    BinarySensor {
        /// Current value.
        value: bool,
    },
    /// Bounded numeric output.
    Number {
        /// Current value.
        value: f32,
        /// Lower bound.
        min: f32,
        /// Upper bound.
        max: f32,
        /// Increment.
        step: f32,
        /// Unit of measurement.
        unit: String,
        /// Invoked with the requested value.
        on_write: WriteCallback<f32>,
    },
    /// Boolean output.
    BinarySwitch {
        /// Current value.
        value: bool,
        /// Invoked with the requested state.
        on_write: WriteCallback<bool>,
    },
}

impl std::fmt::Debug for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sensor {
                value,
                precision,
                unit,
                update_period,
            } => f
                .debug_struct("Sensor")
                .field("value", value)
                .field("precision", precision)
                .field("unit", unit)
                .field("update_period", update_period)
                .finish(),
            Self::BinarySensor { value } => {
                f.debug_struct("BinarySensor").field("value", value).finish()
            }
            Self::Number {
                value,
                min,
                max,
                step,
                unit,
                ..
            } => f
                .debug_struct("Number")
                .field("value", value)
                .field("min", min)
                .field("max", max)
                .field("step", step)
                .field("unit", unit)
                .finish_non_exhaustive(),
            Self::BinarySwitch { value, .. } => f
                .debug_struct("BinarySwitch")
                .field("value", value)
                .finish_non_exhaustive(),
        }
    }
}

/// One endpoint exposed by a driver.
#[derive(Debug, Clone)]
pub struct Device {
    uid: String,
    name: String,
    device_class: Option<String>,
    kind: DeviceKind,
}

impl Device {
    /// Creates a numeric sensor.
    #[must_use]
    pub fn sensor(uid: impl Into<String>, unit: impl Into<String>, precision: usize) -> Self {
        Self::new(
            uid,
            DeviceKind::Sensor {
                value: 0.0,
                precision,
                unit: unit.into(),
                update_period: None,
            },
        )
    }

    /// Creates a binary sensor.
    #[must_use]
    pub fn binary_sensor(uid: impl Into<String>) -> Self {
        Self::new(uid, DeviceKind::BinarySensor { value: false })
    }

    /// Creates a bounded numeric output.
    ///
    /// The initial value is `min`.
    #[must_use]
    pub fn number<F>(uid: impl Into<String>, min: f32, max: f32, step: f32, on_write: F) -> Self
    where
        F: Fn(f32) + Send + Sync + 'static,
    {
        Self::new(
            uid,
            DeviceKind::Number {
                value: min,
                min,
                max,
                step,
                unit: String::new(),
                on_write: Arc::new(on_write),
            },
        )
    }

    /// Creates a switch.
    #[must_use]
    pub fn binary_switch<F>(uid: impl Into<String>, on_write: F) -> Self
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        Self::new(
            uid,
            DeviceKind::BinarySwitch {
                value: false,
                on_write: Arc::new(on_write),
            },
        )
    }

    fn new(uid: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            uid: uid.into(),
            name: String::new(),
            device_class: None,
            kind,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the Home Assistant device class (`temperature`, `humidity`, ...).
    #[must_use]
    pub fn with_device_class(mut self, class: impl Into<String>) -> Self {
        self.device_class = Some(class.into());
        self
    }

    /// Sets the unit of measurement. Ignored for boolean kinds.
    #[must_use]
    pub fn with_unit(mut self, new_unit: impl Into<String>) -> Self {
        match &mut self.kind {
            DeviceKind::Sensor { unit, .. } | DeviceKind::Number { unit, .. } => {
                *unit = new_unit.into();
            }
            DeviceKind::BinarySensor { .. } | DeviceKind::BinarySwitch { .. } => {}
        }
        self
    }

    /// Sets the refresh period of a sensor. Ignored for other kinds.
    #[must_use]
    pub fn with_update_period(mut self, period: Duration) -> Self {
        if let DeviceKind::Sensor { update_period, .. } = &mut self.kind {
            *update_period = Some(period);
        }
        self
    }

    /// Returns the device identifier, unique within its driver.
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Returns the display name (may be empty).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the device class, if any.
    #[must_use]
    pub fn device_class(&self) -> Option<&str> {
        self.device_class.as_deref()
    }

    /// Returns the kind-specific payload.
    #[must_use]
    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    /// Returns the device type.
    #[must_use]
    pub fn device_type(&self) -> DeviceType {
        match self.kind {
            DeviceKind::Sensor { .. } => DeviceType::Sensor,
            DeviceKind::BinarySensor { .. } => DeviceType::BinarySensor,
            DeviceKind::Number { .. } => DeviceType::Number,
            DeviceKind::BinarySwitch { .. } => DeviceType::BinarySwitch,
        }
    }

    /// Returns `true` if the hub can write to this device.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        matches!(
            self.kind,
            DeviceKind::Number { .. } | DeviceKind::BinarySwitch { .. }
        )
    }

    /// Sets the value of a numeric device.
    ///
    /// Returns `true` if the value changed. Boolean kinds are left untouched.
    pub fn set_float(&mut self, new_value: f32) -> bool {
        match &mut self.kind {
            DeviceKind::Sensor { value, .. } | DeviceKind::Number { value, .. } => {
                let changed = value.to_bits() != new_value.to_bits();
                *value = new_value;
                changed
            }
            DeviceKind::BinarySensor { .. } | DeviceKind::BinarySwitch { .. } => false,
        }
    }

    /// Sets the value of a boolean device.
    ///
    /// Returns `true` if the value changed. Numeric kinds are left untouched.
    pub fn set_bool(&mut self, new_value: bool) -> bool {
        match &mut self.kind {
            DeviceKind::BinarySensor { value } | DeviceKind::BinarySwitch { value, .. } => {
                let changed = *value != new_value;
                *value = new_value;
                changed
            }
            DeviceKind::Sensor { .. } | DeviceKind::Number { .. } => false,
        }
    }

    /// Returns the numeric value, if this is a numeric kind.
    #[must_use]
    pub fn float_value(&self) -> Option<f32> {
        match self.kind {
            DeviceKind::Sensor { value, .. } | DeviceKind::Number { value, .. } => Some(value),
            DeviceKind::BinarySensor { .. } | DeviceKind::BinarySwitch { .. } => None,
        }
    }

    /// Returns the boolean value, if this is a boolean kind.
    #[must_use]
    pub fn bool_value(&self) -> Option<bool> {
        match self.kind {
            DeviceKind::BinarySensor { value } | DeviceKind::BinarySwitch { value, .. } => {
                Some(value)
            }
            DeviceKind::Sensor { .. } | DeviceKind::Number { .. } => None,
        }
    }

    /// Formats the current value as published on the state topic.
    #[must_use]
    pub fn state_payload(&self) -> String {
        match &self.kind {
            DeviceKind::Sensor {
                value, precision, ..
            } => format!("{value:.precision$}"),
            DeviceKind::BinarySensor { value } | DeviceKind::BinarySwitch { value, .. } => {
                if *value { "1" } else { "0" }.to_string()
            }
            DeviceKind::Number { value, .. } => value.to_string(),
        }
    }

    /// QoS used when publishing state.
    #[must_use]
    pub fn state_qos(&self) -> QoS {
        if self.is_writable() {
            QoS::ExactlyOnce
        } else {
            QoS::AtMostOnce
        }
    }

    /// Whether published state is retained by the broker.
    #[must_use]
    pub fn state_retain(&self) -> bool {
        self.is_writable()
    }

    /// Parses a command payload and hands the requested value to the write
    /// callback.
    ///
    /// Switches accept `1`/`0`, `on`/`off` and `true`/`false` (any case).
    /// Numbers accept a decimal value within `[min, max]`.
    ///
    /// # Errors
    ///
    /// Returns a [`CommandError`] if the device is read-only, the payload does
    /// not parse, or a number lies outside the device bounds.
    pub fn apply_command(&self, payload: &[u8]) -> Result<(), CommandError> {
        let text = std::str::from_utf8(payload)
            .map_err(|_| CommandError::InvalidPayload("not UTF-8".to_string()))?
            .trim();

        match &self.kind {
            DeviceKind::BinarySwitch { on_write, .. } => {
                let state = parse_switch(text)?;
                on_write(state);
                Ok(())
            }
            DeviceKind::Number {
                min, max, on_write, ..
            } => {
                let value: f32 = text
                    .parse()
                    .map_err(|_| CommandError::InvalidPayload(text.to_string()))?;
                if !value.is_finite() || value < *min || value > *max {
                    return Err(CommandError::OutOfRange {
                        min: *min,
                        max: *max,
                        value,
                    });
                }
                on_write(value);
                Ok(())
            }
            DeviceKind::Sensor { .. } | DeviceKind::BinarySensor { .. } => {
                Err(CommandError::NotWritable(self.uid.clone()))
            }
        }
    }
}

fn parse_switch(text: &str) -> Result<bool, CommandError> {
    match text.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" => Ok(true),
        "0" | "off" | "false" => Ok(false),
        _ => Err(CommandError::InvalidPayload(text.to_string())),
    }
}
