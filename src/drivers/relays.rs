// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Virtual relay bank.
//!
//! Exposes `count` switches `relay0`..`relayN` and a binary sensor `any_on`.
//! Switch commands only record the requested level and raise a [`Flag`];
//! the driver thread picks the change up and reports the new states.
//!
//! Config:
//!
//! ```json
//! { "count": 4 }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::device::Device;
use crate::driver::{Driver, DriverContext, DriverHooks, DriverInfo, Flag};
use crate::error::HookError;

/// Driver name.
pub const NAME: &str = "relays";

/// Largest supported bank.
pub const MAX_RELAYS: usize = 16;

/// Uid of the sensor reporting whether any relay is on.
pub const ANY_ON_UID: &str = "any_on";

const DEFAULT_CONFIG: &str = r#"{"count": 4}"#;
const POLL: Duration = Duration::from_millis(100);

/// Returns the uid of relay `index`.
#[must_use]
pub fn relay_uid(index: usize) -> String {
    format!("relay{index}")
}

/// Bank of relays kept in a bit mask.
#[derive(Debug, Default)]
pub struct RelayBank {
    count: usize,
    levels: Arc<AtomicU32>,
    changed: Flag,
}

impl RelayBank {
    fn publish_levels(&self, ctx: &DriverContext) {
        let levels = self.levels.load(Ordering::Acquire);
        for index in 0..self.count {
            let on = levels & (1 << index) != 0;
            let uid = relay_uid(index);
            if ctx.devices().get(&uid).and_then(|d| d.bool_value()) != Some(on) {
                ctx.set_bool(&uid, on);
            }
        }
        if ctx.devices().get(ANY_ON_UID).and_then(|d| d.bool_value()) != Some(levels != 0) {
            ctx.set_bool(ANY_ON_UID, levels != 0);
        }
    }
}

impl DriverHooks for RelayBank {
    fn on_init(&mut self, ctx: &DriverContext) -> Result<(), HookError> {
        let count = ctx.config().get_int("count", 4);
        self.count = usize::try_from(count)
            .ok()
            .filter(|n| (1..=MAX_RELAYS).contains(n))
            .ok_or_else(|| HookError::new(format!("relay count {count} out of 1..={MAX_RELAYS}")))?;
        self.levels.store(0, Ordering::Release);
        self.changed.lower();

        for index in 0..self.count {
            let levels = Arc::clone(&self.levels);
            let changed = self.changed.clone();
            let bit = 1u32 << index;
            ctx.add_device(
                Device::binary_switch(relay_uid(index), move |on| {
                    if on {
                        levels.fetch_or(bit, Ordering::AcqRel);
                    } else {
                        levels.fetch_and(!bit, Ordering::AcqRel);
                    }
                    changed.raise();
                })
                .with_name(format!("Relay {index}")),
            );
        }
        ctx.add_device(
            Device::binary_sensor(ANY_ON_UID)
                .with_name("Any relay on")
                .with_device_class("power"),
        );
        tracing::info!(driver = %ctx.name(), count = self.count, "Relay bank ready");
        Ok(())
    }

    fn run(&mut self, ctx: &DriverContext) {
        while ctx.is_running() {
            if self.changed.wait_take(POLL) {
                self.publish_levels(ctx);
            }
        }
    }

    fn on_stop(&mut self, ctx: &DriverContext) -> Result<(), HookError> {
        self.levels.store(0, Ordering::Release);
        tracing::debug!(driver = %ctx.name(), "All relays released");
        Ok(())
    }
}

/// Returns the relay bank driver.
#[must_use]
pub fn driver() -> Driver {
    Driver::new(
        DriverInfo::new(NAME).with_default_config(DEFAULT_CONFIG),
        RelayBank::default(),
    )
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::driver::{DriverEvent, DriverEventKind, DriverState};

    async fn next_update(rx: &mut mpsc::Receiver<DriverEvent>) -> DriverEvent {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if event.kind == DriverEventKind::Updated {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn command_switches_relay() {
        let (tx, mut rx) = mpsc::channel(32);
        let mut driver = driver();
        driver.set_event_sender(tx);
        driver.init(br#"{"count": 2}"#).await.unwrap();
        assert_eq!(driver.devices().len(), 3);
        driver.start().await.unwrap();

        let relay = driver.devices().get("relay1").unwrap();
        relay.apply_command(b"on").unwrap();

        let first = next_update(&mut rx).await;
        assert_eq!(first.device.uid(), "relay1");
        assert_eq!(first.device.bool_value(), Some(true));
        let second = next_update(&mut rx).await;
        assert_eq!(second.device.uid(), ANY_ON_UID);
        assert_eq!(second.device.bool_value(), Some(true));

        assert_eq!(driver.devices().get("relay1").unwrap().bool_value(), Some(true));
        assert_eq!(driver.devices().get("relay0").unwrap().bool_value(), Some(false));

        driver.stop().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_count_fails_init() {
        let mut driver = driver();
        let err = driver.init(br#"{"count": 40}"#).await.unwrap_err();
        assert!(matches!(err, crate::error::DriverError::HookFailed { .. }));
        assert_eq!(driver.state(), DriverState::Invalid);
    }
}
