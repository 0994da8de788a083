// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Uptime sensor.
//!
//! Config:
//!
//! ```json
//! { "period": 10000, "name": "Uptime" }
//! ```
//!
//! `period` is the refresh period in milliseconds (at least 100).

use std::time::{Duration, Instant};

use crate::device::Device;
use crate::driver::{Driver, DriverContext, DriverHooks, DriverInfo, Periodic};
use crate::error::HookError;

/// Driver name.
pub const NAME: &str = "uptime";

/// Device uid.
pub const UID: &str = "uptime";

const DEFAULT_CONFIG: &str = r#"{"period": 10000}"#;
const MIN_PERIOD_MS: i64 = 100;

/// Reports the seconds elapsed since the driver was started.
#[derive(Debug, Default)]
pub struct Uptime {
    period: Duration,
}

impl DriverHooks for Uptime {
    fn on_init(&mut self, ctx: &DriverContext) -> Result<(), HookError> {
        let period_ms = ctx.config().get_int("period", 10_000).max(MIN_PERIOD_MS);
        self.period = Duration::from_millis(period_ms.unsigned_abs());

        let name = ctx.config().get_str("name", "Uptime");
        ctx.add_device(
            Device::sensor(UID, "s", 0)
                .with_name(name)
                .with_device_class("duration")
                .with_update_period(self.period),
        );
        Ok(())
    }

    fn run(&mut self, ctx: &DriverContext) {
        let started = Instant::now();
        let mut timer = Periodic::new(self.period);
        while timer.wait(ctx) {
            #[allow(clippy::cast_precision_loss)]
            let secs = started.elapsed().as_secs() as f32;
            ctx.set_float(UID, secs);
        }
    }
}

/// Returns the uptime driver.
#[must_use]
pub fn driver() -> Driver {
    Driver::new(
        DriverInfo::new(NAME).with_default_config(DEFAULT_CONFIG),
        Uptime::default(),
    )
}
