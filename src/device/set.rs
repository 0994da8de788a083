// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared live device collection of one driver.

use std::sync::Arc;

use parking_lot::RwLock;

use super::Device;

/// Live devices of a driver, shared between the driver thread and the node.
///
/// The driver thread mutates devices; the node reads snapshots when it
/// (re)announces them and looks up write callbacks when commands arrive.
/// Insertion order is preserved.
#[derive(Debug, Clone, Default)]
pub struct DeviceSet {
    inner: Arc<RwLock<Vec<Device>>>,
}

impl DeviceSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a device, replacing any device with the same uid.
    ///
    /// Returns `true` if the uid was new.
    pub fn insert(&self, device: Device) -> bool {
        let mut devices = self.inner.write();
        if let Some(existing) = devices.iter_mut().find(|d| d.uid() == device.uid()) {
            *existing = device;
            false
        } else {
            devices.push(device);
            true
        }
    }

    /// Applies `f` to the device with the given uid and returns a copy of the
    /// result.
    pub fn update<F>(&self, uid: &str, f: F) -> Option<Device>
    where
        F: FnOnce(&mut Device),
    {
        let mut devices = self.inner.write();
        let device = devices.iter_mut().find(|d| d.uid() == uid)?;
        f(device);
        Some(device.clone())
    }

    /// Removes and returns the device with the given uid.
    pub fn remove(&self, uid: &str) -> Option<Device> {
        let mut devices = self.inner.write();
        let index = devices.iter().position(|d| d.uid() == uid)?;
        Some(devices.remove(index))
    }

    /// Returns a copy of the device with the given uid.
    #[must_use]
    pub fn get(&self, uid: &str) -> Option<Device> {
        self.inner.read().iter().find(|d| d.uid() == uid).cloned()
    }

    /// Returns a copy of every device, in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Device> {
        self.inner.read().clone()
    }

    /// Removes every device.
    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Returns the number of devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns `true` if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
