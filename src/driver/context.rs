// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Execution context handed to driver hooks.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use super::config::DriverConfig;
use super::event::{DriverEvent, DriverEventKind};
use super::flag::RunSignal;
use crate::device::{Device, DeviceSet};

/// What a driver thread sees of the framework.
///
/// The context is cheap to clone. Write callbacks of switches and numbers
/// typically capture a clone so they can report the new value.
#[derive(Debug, Clone)]
pub struct DriverContext {
    name: String,
    config: DriverConfig,
    signal: RunSignal,
    devices: DeviceSet,
    events: Option<mpsc::Sender<DriverEvent>>,
}

impl DriverContext {
    pub(crate) fn new(
        name: String,
        config: DriverConfig,
        signal: RunSignal,
        devices: DeviceSet,
        events: Option<mpsc::Sender<DriverEvent>>,
    ) -> Self {
        Self {
            name,
            config,
            signal,
            devices,
            events,
        }
    }

    pub(crate) fn signal(&self) -> &RunSignal {
        &self.signal
    }

    /// Returns the driver name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Returns the driver's live device set.
    #[must_use]
    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    /// Returns `true` while the driver is started and not asked to stop.
    ///
    /// Main loops check this between iterations.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.signal.is_running()
    }

    /// Sleeps for `duration`, returning early if the driver is stopped.
    ///
    /// Returns `true` if the driver is still running afterwards.
    pub fn sleep(&self, duration: Duration) -> bool {
        self.sleep_until(Instant::now() + duration)
    }

    /// Sleeps until `deadline`, returning early if the driver is stopped.
    ///
    /// Returns `true` if the driver is still running afterwards.
    pub fn sleep_until(&self, deadline: Instant) -> bool {
        !self.signal.wait_halted_until(deadline) && self.is_running()
    }

    /// Registers a device and announces it.
    pub fn add_device(&self, device: Device) {
        self.devices.insert(device.clone());
        self.emit(DriverEventKind::Added, device);
    }

    /// Mutates a device in place and announces the new value.
    ///
    /// Returns `false` if no device has this uid.
    pub fn update_device<F>(&self, uid: &str, f: F) -> bool
    where
        F: FnOnce(&mut Device),
    {
        match self.devices.update(uid, f) {
            Some(copy) => {
                self.emit(DriverEventKind::Updated, copy);
                true
            }
            None => {
                tracing::warn!(driver = %self.name, uid, "Update for unknown device");
                false
            }
        }
    }

    /// Sets the value of a numeric device and announces it.
    pub fn set_float(&self, uid: &str, value: f32) -> bool {
        self.update_device(uid, |d| {
            d.set_float(value);
        })
    }

    /// Sets the value of a boolean device and announces it.
    pub fn set_bool(&self, uid: &str, value: bool) -> bool {
        self.update_device(uid, |d| {
            d.set_bool(value);
        })
    }

    /// Removes a device and announces its removal.
    pub fn remove_device(&self, uid: &str) -> bool {
        match self.devices.remove(uid) {
            Some(device) => {
                self.emit(DriverEventKind::Removed, device);
                true
            }
            None => false,
        }
    }

    fn emit(&self, kind: DriverEventKind, device: Device) {
        let Some(events) = &self.events else {
            return;
        };
        let uid = device.uid().to_string();
        match events.try_send(DriverEvent::new(kind, self.name.clone(), device)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(driver = %self.name, uid = %uid, kind = %kind, "Event queue full, dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(driver = %self.name, uid = %uid, "Event queue closed");
            }
        }
    }
}

/// Fixed-period loop timer.
///
/// Deadlines advance by exactly one period per tick, so a slow iteration does
/// not shift the schedule. When an iteration overruns a whole period the
/// missed ticks are skipped.
///
/// # Examples
///
/// ```no_run
/// # use std::time::Duration;
/// # use iot_node::driver::{DriverContext, Periodic};
/// # fn run(ctx: &DriverContext) {
/// let mut timer = Periodic::new(Duration::from_secs(1));
/// while timer.wait(ctx) {
///     // sample the sensor
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Periodic {
    period: Duration,
    next: Option<Instant>,
}

impl Periodic {
    /// Creates a timer. The first [`wait`](Self::wait) returns immediately.
    #[must_use]
    pub fn new(period: Duration) -> Self {
        Self { period, next: None }
    }

    /// Returns the period.
    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits for the next tick.
    ///
    /// Returns `false` once the driver is stopped.
    pub fn wait(&mut self, ctx: &DriverContext) -> bool {
        let now = Instant::now();
        let deadline = match self.next {
            None => now,
            Some(next) if next < now => {
                tracing::debug!(driver = %ctx.name(), "Periodic loop overran, skipping ticks");
                now
            }
            Some(next) => next,
        };
        self.next = Some(deadline + self.period);
        ctx.sleep_until(deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(events: Option<mpsc::Sender<DriverEvent>>) -> (DriverContext, RunSignal) {
        let signal = RunSignal::new();
        let ctx = DriverContext::new(
            "test".to_string(),
            DriverConfig::empty("test"),
            signal.clone(),
            DeviceSet::new(),
            events,
        );
        (ctx, signal)
    }

    #[test]
    fn event_carries_copy() {
        let (tx, mut rx) = mpsc::channel(4);
        let (ctx, _) = context(Some(tx));

        ctx.add_device(Device::sensor("t", "", 1));
        ctx.set_float("t", 1.0);
        ctx.set_float("t", 2.0);

        let added = rx.try_recv().unwrap();
        assert_eq!(added.kind, DriverEventKind::Added);
        assert_eq!(added.driver, "test");

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.device.float_value(), Some(1.0));
        assert_eq!(second.device.float_value(), Some(2.0));
        assert_eq!(ctx.devices().get("t").and_then(|d| d.float_value()), Some(2.0));
    }

    #[test]
    fn full_queue_drops_new_events() {
        let (tx, mut rx) = mpsc::channel(1);
        let (ctx, _) = context(Some(tx));

        ctx.add_device(Device::binary_sensor("a"));
        ctx.set_bool("a", true);

        assert_eq!(rx.try_recv().unwrap().kind, DriverEventKind::Added);
        assert!(rx.try_recv().is_err());
        assert_eq!(ctx.devices().get("a").and_then(|d| d.bool_value()), Some(true));
    }

    #[test]
    fn remove_device_emits_removed() {
        let (tx, mut rx) = mpsc::channel(4);
        let (ctx, _) = context(Some(tx));
        ctx.add_device(Device::binary_sensor("a"));
        assert!(ctx.remove_device("a"));
        assert!(!ctx.remove_device("a"));

        rx.try_recv().unwrap();
        let removed = rx.try_recv().unwrap();
        assert_eq!(removed.kind, DriverEventKind::Removed);
        assert_eq!(removed.device.uid(), "a");
    }

    #[test]
    fn unknown_device_update_is_ignored() {
        let (ctx, _) = context(None);
        assert!(!ctx.set_float("nope", 1.0));
    }

    #[test]
    fn sleep_returns_false_when_halted() {
        let (ctx, signal) = context(None);
        signal.start();
        assert!(ctx.sleep(Duration::from_millis(5)));

        signal.halt();
        let started = Instant::now();
        assert!(!ctx.sleep(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn periodic_stops_with_driver() {
        let (ctx, signal) = context(None);
        signal.start();

        let mut timer = Periodic::new(Duration::from_millis(5));
        assert!(timer.wait(&ctx));
        assert!(timer.wait(&ctx));

        signal.halt();
        assert!(!timer.wait(&ctx));
    }
}
