// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Home Assistant discovery descriptors and device topics.
//!
//! Every device is announced on
//! `homeassistant/<type>/<node>/<uid>/config` with a retained JSON
//! descriptor. Its state lives on `<node>/<uid>/state` and, for writable
//! kinds, commands arrive on `<node>/<uid>/command`.

use serde::Serialize;

use super::{Device, DeviceKind};

/// Topic prefix the hub listens on for discovery descriptors.
pub const DISCOVERY_PREFIX: &str = "homeassistant";

/// Returns the state topic of a device.
#[must_use]
pub fn state_topic(node: &str, uid: &str) -> String {
    format!("{node}/{uid}/state")
}

/// Returns the command topic of a device.
#[must_use]
pub fn command_topic(node: &str, uid: &str) -> String {
    format!("{node}/{uid}/command")
}

/// Returns the discovery topic of a device.
#[must_use]
pub fn discovery_topic(node: &str, device: &Device) -> String {
    format!(
        "{DISCOVERY_PREFIX}/{}/{node}/{}/config",
        device.device_type(),
        device.uid()
    )
}

/// Static identity of the node, shared by every descriptor it publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Node name, used as topic prefix.
    pub name: String,
    /// Immutable system identifier.
    pub system_id: String,
    /// Manufacturer string.
    pub manufacturer: String,
    /// Model string.
    pub model: String,
    /// Software version.
    pub sw_version: String,
}

impl NodeIdentity {
    /// Creates an identity with the crate's manufacturer, model and version.
    #[must_use]
    pub fn new(name: impl Into<String>, system_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_id: system_id.into(),
            manufacturer: "iot_node".to_string(),
            model: "generic".to_string(),
            sw_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// The `device` block grouping every entity of the node in the hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceBlock {
    /// Node name and system id, deduplicated.
    pub identifiers: Vec<String>,
    /// Manufacturer string.
    pub manufacturer: String,
    /// Model string.
    pub model: String,
    /// Node name.
    pub name: String,
    /// Software version.
    pub sw_version: String,
}

impl From<&NodeIdentity> for DeviceBlock {
    fn from(identity: &NodeIdentity) -> Self {
        let mut identifiers = vec![identity.name.clone()];
        if identity.system_id != identity.name {
            identifiers.push(identity.system_id.clone());
        }
        Self {
            identifiers,
            manufacturer: identity.manufacturer.clone(),
            model: identity.model.clone(),
            name: identity.name.clone(),
            sw_version: identity.sw_version.clone(),
        }
    }
}

/// JSON document announcing one device to the hub.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryDescriptor {
    #[serde(skip_serializing_if = "Option::is_none")]
    device_class: Option<String>,
    object_id: String,
    unique_id: String,
    name: String,
    state_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit_of_measurement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expire_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_on: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_off: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_on: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state_off: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    optimistic: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    qos: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retain: Option<bool>,
    device: DeviceBlock,
}

impl DiscoveryDescriptor {
    /// Builds the descriptor of `device` as published by `node`.
    #[must_use]
    pub fn new(node: &NodeIdentity, device: &Device) -> Self {
        let id = format!("{}_{}", node.name, device.uid());
        let name = if device.name().is_empty() {
            id.clone()
        } else {
            device.name().to_string()
        };

        let mut descriptor = Self {
            device_class: device.device_class().map(str::to_string),
            object_id: id.clone(),
            unique_id: id,
            name,
            state_topic: state_topic(&node.name, device.uid()),
            command_topic: None,
            unit_of_measurement: None,
            expire_after: None,
            payload_on: None,
            payload_off: None,
            state_on: None,
            state_off: None,
            optimistic: None,
            min: None,
            max: None,
            step: None,
            qos: None,
            retain: None,
            device: DeviceBlock::from(node),
        };

        match device.kind() {
            DeviceKind::Sensor {
                unit,
                update_period,
                ..
            } => {
                descriptor.unit_of_measurement = non_empty(unit);
                descriptor.expire_after = update_period.map(|p| p.as_secs() * 3);
            }
            DeviceKind::BinarySensor { .. } => {
                descriptor.payload_on = Some("1");
                descriptor.payload_off = Some("0");
            }
            DeviceKind::BinarySwitch { .. } => {
                descriptor.command_topic = Some(command_topic(&node.name, device.uid()));
                descriptor.payload_on = Some("1");
                descriptor.payload_off = Some("0");
                descriptor.state_on = Some("1");
                descriptor.state_off = Some("0");
                descriptor.optimistic = Some(false);
                descriptor.qos = Some(2);
                descriptor.retain = Some(true);
            }
            DeviceKind::Number {
                min,
                max,
                step,
                unit,
                ..
            } => {
                descriptor.command_topic = Some(command_topic(&node.name, device.uid()));
                descriptor.min = Some(*min);
                descriptor.max = Some(*max);
                descriptor.step = Some(*step);
                descriptor.unit_of_measurement = non_empty(unit);
                descriptor.qos = Some(2);
                descriptor.retain = Some(true);
            }
        }

        descriptor
    }

    /// Returns the unique id (`<node>_<uid>`).
    #[must_use]
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Returns the command topic, for writable devices.
    #[must_use]
    pub fn command_topic(&self) -> Option<&str> {
        self.command_topic.as_deref()
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}
