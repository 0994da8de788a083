// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Thread synchronization primitives for driver threads.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Edge signal shared between a producer and a driver thread.
///
/// Interrupt-like producers (a GPIO edge callback, a timer) only [`raise`]
/// the flag; the driver thread blocks in [`wait_take`] and handles the edge
/// in its own context.
///
/// [`raise`]: Flag::raise
/// [`wait_take`]: Flag::wait_take
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use iot_node::driver::Flag;
///
/// let edge = Flag::new();
/// let isr = edge.clone();
/// std::thread::spawn(move || isr.raise());
///
/// assert!(edge.wait_take(Duration::from_secs(1)));
/// assert!(!edge.is_raised());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Flag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Flag {
    /// Creates a lowered flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the flag and wakes every waiter.
    pub fn raise(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    /// Lowers the flag and wakes every waiter.
    pub fn lower(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = false;
        cvar.notify_all();
    }

    /// Returns `true` if the flag is raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Lowers the flag and returns whether it was raised.
    pub fn take(&self) -> bool {
        std::mem::replace(&mut *self.inner.0.lock(), false)
    }

    /// Waits until the flag is raised or `timeout` elapses.
    ///
    /// Returns `true` if the flag is raised.
    pub fn wait_raised(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, true, false)
    }

    /// Waits until the flag is lowered or `timeout` elapses.
    ///
    /// Returns `true` if the flag is lowered.
    pub fn wait_lowered(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, false, false)
    }

    /// Waits until the flag is raised, then lowers it.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_take(&self, timeout: Duration) -> bool {
        self.wait_for(timeout, true, true)
    }

    fn wait_for(&self, timeout: Duration, wanted: bool, consume: bool) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut value = lock.lock();
        while *value != wanted {
            if cvar.wait_until(&mut value, deadline).timed_out() {
                break;
            }
        }
        let reached = *value == wanted;
        if reached && consume {
            *value = false;
        }
        reached
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Idle,
    Run,
    Halt,
}

/// Run/cancel signal of one driver thread lifetime.
///
/// Starts idle; `start` opens it, `halt` closes it for good. Once halted a
/// signal never runs again, so a thread left over from an earlier lifetime
/// cannot be restarted by mistake.
#[derive(Debug, Clone)]
pub(crate) struct RunSignal {
    inner: Arc<(Mutex<Gate>, Condvar)>,
}

impl RunSignal {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(Gate::Idle), Condvar::new())),
        }
    }

    pub(crate) fn start(&self) {
        let (lock, cvar) = &*self.inner;
        let mut gate = lock.lock();
        if *gate == Gate::Idle {
            *gate = Gate::Run;
        }
        cvar.notify_all();
    }

    pub(crate) fn halt(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = Gate::Halt;
        cvar.notify_all();
    }

    pub(crate) fn is_running(&self) -> bool {
        *self.inner.0.lock() == Gate::Run
    }

    /// Blocks until started or halted. Returns `true` if started.
    pub(crate) fn wait_started(&self) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut gate = lock.lock();
        while *gate == Gate::Idle {
            cvar.wait(&mut gate);
        }
        *gate == Gate::Run
    }

    /// Blocks until halted or `deadline`. Returns `true` if halted.
    pub(crate) fn wait_halted_until(&self, deadline: Instant) -> bool {
        let (lock, cvar) = &*self.inner;
        let mut gate = lock.lock();
        while *gate != Gate::Halt {
            if cvar.wait_until(&mut gate, deadline).timed_out() {
                break;
            }
        }
        *gate == Gate::Halt
    }
}
