// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! What the node publishes about its drivers and devices.
//!
//! Publishing failures are logged and never propagated: the broker may go
//! away at any moment and the next online transition republishes
//! everything.

use crate::device::{
    Device, DeviceSet, DiscoveryDescriptor, command_topic, discovery_topic, state_topic,
};
use crate::driver::Driver;
use crate::protocol::{Message, QoS};

use super::{Node, Slot};

impl Node {
    /// Publishes the active config and state name of a driver, retained.
    pub(super) fn publish_driver_status(&self, driver: &Driver) {
        let router = &self.inner.router;
        let name = driver.name();

        let config = driver.config().to_json_string();
        if let Err(e) = router.publish_subtopic(
            &format!("drivers/{name}/config"),
            config.as_bytes(),
            QoS::AtLeastOnce,
            true,
        ) {
            tracing::warn!(driver = %name, error = %e, "Could not publish driver config");
        }

        if let Err(e) = router.publish_subtopic(
            &format!("drivers/{name}/state"),
            driver.state().as_str().as_bytes(),
            QoS::AtLeastOnce,
            true,
        ) {
            tracing::warn!(driver = %name, error = %e, "Could not publish driver state");
        }
    }

    pub(super) fn announce_devices(&self, slot: &Slot) {
        for device in slot.devices.snapshot() {
            self.announce_device(&slot.name, &device);
        }
    }

    /// Subscribes the command topic of a writable device, then publishes its
    /// discovery descriptor and current state.
    pub(super) fn announce_device(&self, driver: &str, device: &Device) {
        if device.is_writable() {
            self.listen_for_commands(driver, device.uid());
        }

        let identity = &self.inner.identity;
        let descriptor = DiscoveryDescriptor::new(identity, device);
        let topic = discovery_topic(&identity.name, device);
        match self
            .inner
            .router
            .publish_json(&topic, &descriptor, QoS::ExactlyOnce, true)
        {
            Ok(()) => tracing::debug!(driver = %driver, uid = %device.uid(), "Device announced"),
            Err(e) => tracing::warn!(driver = %driver, uid = %device.uid(), error = %e, "Could not publish discovery"),
        }

        self.publish_state(device);
    }

    /// Drops the command subscription of a device and clears its retained
    /// discovery descriptor.
    pub(super) fn withdraw_device(&self, driver: &str, device: &Device) {
        let node = &self.inner.identity.name;
        self.inner.router.unsubscribe(
            &command_topic(node, device.uid()),
            &device_subscriber(driver, device.uid()),
        );

        let topic = discovery_topic(node, device);
        match self.inner.router.publish(&topic, &[], QoS::ExactlyOnce, true) {
            Ok(()) => tracing::debug!(driver = %driver, uid = %device.uid(), "Device withdrawn"),
            Err(e) => tracing::warn!(driver = %driver, uid = %device.uid(), error = %e, "Could not clear discovery"),
        }
    }

    pub(super) fn publish_state(&self, device: &Device) {
        let topic = state_topic(&self.inner.identity.name, device.uid());
        if let Err(e) = self.inner.router.publish(
            &topic,
            device.state_payload().as_bytes(),
            device.state_qos(),
            device.state_retain(),
        ) {
            tracing::warn!(uid = %device.uid(), error = %e, "Could not publish device state");
        }
    }

    fn listen_for_commands(&self, driver: &str, uid: &str) {
        let Some(slot) = self.slot(driver) else {
            return;
        };
        let devices = slot.devices.clone();
        let driver_name = driver.to_string();
        let device_uid = uid.to_string();

        let topic = command_topic(&self.inner.identity.name, uid);
        let result = self.inner.router.subscribe(
            &topic,
            QoS::ExactlyOnce,
            &device_subscriber(driver, uid),
            move |msg| deliver_command(&driver_name, &devices, &device_uid, msg),
        );
        if let Err(e) = result {
            tracing::warn!(driver = %driver, uid = %uid, error = %e, "Could not subscribe command topic");
        }
    }
}

fn device_subscriber(driver: &str, uid: &str) -> String {
    format!("device:{driver}:{uid}")
}

/// Hands a command to the device as it currently exists in its driver.
fn deliver_command(driver: &str, devices: &DeviceSet, uid: &str, msg: &Message) {
    let Some(device) = devices.get(uid) else {
        tracing::warn!(driver = %driver, uid = %uid, "Command for a device that no longer exists");
        return;
    };
    match device.apply_command(&msg.payload) {
        Ok(()) => tracing::debug!(driver = %driver, uid = %uid, "Command applied"),
        Err(e) => tracing::warn!(driver = %driver, uid = %uid, error = %e, "Command rejected"),
    }
}
