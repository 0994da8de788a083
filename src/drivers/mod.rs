// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hardware-free drivers shipped with the node.
//!
//! - [`uptime`]: periodic sensor reporting seconds since the driver started
//! - [`relays`]: bank of virtual relays switched over MQTT

pub mod relays;
pub mod uptime;

use crate::driver::Driver;

/// Returns every built-in driver, in start order.
#[must_use]
pub fn builtin() -> Vec<Driver> {
    vec![uptime::driver(), relays::driver()]
}
