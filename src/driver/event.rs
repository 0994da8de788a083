// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device change notifications emitted by drivers.

use crate::device::Device;

/// Kind of device change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverEventKind {
    /// The device value changed.
    Updated,
    /// The device appeared.
    Added,
    /// The device went away.
    Removed,
}

impl std::fmt::Display for DriverEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Updated => f.write_str("updated"),
            Self::Added => f.write_str("added"),
            Self::Removed => f.write_str("removed"),
        }
    }
}

/// A device change, carrying a copy of the device taken at emission time.
#[derive(Debug, Clone)]
pub struct DriverEvent {
    /// What happened.
    pub kind: DriverEventKind,
    /// Name of the emitting driver.
    pub driver: String,
    /// The device as it was when the event was emitted.
    pub device: Device,
}

impl DriverEvent {
    /// Creates an event.
    #[must_use]
    pub fn new(kind: DriverEventKind, driver: impl Into<String>, device: Device) -> Self {
        Self {
            kind,
            driver: driver.into(),
            device,
        }
    }
}
