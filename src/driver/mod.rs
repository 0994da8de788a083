// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver lifecycle framework.
//!
//! A driver wraps one hardware subsystem. It is described by a [`DriverInfo`]
//! and a set of [`DriverHooks`], and runs on a dedicated OS thread. The
//! control side drives it through a small state machine:
//!
//! ```text
//!          init            start            stop
//!   NEW ─────────▶ INITIALIZED ─────▶ RUNNING ─────▶ FINISHED
//!    ▲                 │  reset                         │
//!    │                 └────────────────────────────────┤
//!    └──── init (from NEW, FINISHED or INVALID) ◀───────┘
//! ```
//!
//! Any failed transition lands in `INVALID`. Every transition waits for the
//! driver thread to acknowledge it, bounded by the handshake timeout.
//!
//! The thread body runs `on_init`, waits to be started, runs `on_start`,
//! then `run` (which loops until [`DriverContext::is_running`] turns false),
//! then `on_stop`. A hook that fails or panics ends the thread.
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//! use iot_node::device::Device;
//! use iot_node::driver::{Driver, DriverContext, DriverHooks, DriverInfo, DriverState, Periodic};
//! use iot_node::error::HookError;
//!
//! struct Counter;
//!
//! impl DriverHooks for Counter {
//!     fn on_init(&mut self, ctx: &DriverContext) -> Result<(), HookError> {
//!         ctx.add_device(Device::sensor("count", "", 0));
//!         Ok(())
//!     }
//!
//!     fn run(&mut self, ctx: &DriverContext) {
//!         let mut n = 0.0;
//!         let mut timer = Periodic::new(Duration::from_millis(10));
//!         while timer.wait(ctx) {
//!             n += 1.0;
//!             ctx.set_float("count", n);
//!         }
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), iot_node::error::DriverError> {
//! let mut driver = Driver::new(DriverInfo::new("counter"), Counter);
//! driver.init(b"").await?;
//! driver.start().await?;
//! assert_eq!(driver.state(), DriverState::Running);
//! driver.stop().await?;
//! assert_eq!(driver.state(), DriverState::Finished);
//! # Ok(())
//! # }
//! ```

mod config;
mod context;
mod event;
mod flag;

pub use config::{DriverConfig, GPIO_COUNT};
pub use context::{DriverContext, Periodic};
pub use event::{DriverEvent, DriverEventKind};
pub use flag::Flag;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::device::DeviceSet;
use crate::error::{DriverError, HookError};
use flag::RunSignal;

/// Default bound on every lifecycle handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default stack size of driver threads.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

/// Lifecycle state of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DriverState {
    /// Never initialized.
    #[default]
    New,
    /// Thread spawned, `on_init` succeeded, waiting to be started.
    Initialized,
    /// Main loop running.
    Running,
    /// Stopped cleanly.
    Finished,
    /// A transition failed.
    Invalid,
}

impl DriverState {
    /// Returns the state name as published to the hub.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Initialized => "INITIALIZED",
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Invalid => "INVALID",
        }
    }
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverInfo {
    name: String,
    default_config: Option<String>,
    stack_size: usize,
    priority: u8,
}

impl DriverInfo {
    /// Creates a description with no default config and default hints.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_config: None,
            stack_size: DEFAULT_STACK_SIZE,
            priority: 1,
        }
    }

    /// Sets the JSON literal used when no valid config is supplied.
    #[must_use]
    pub fn with_default_config(mut self, literal: impl Into<String>) -> Self {
        self.default_config = Some(literal.into());
        self
    }

    /// Sets the thread stack size.
    #[must_use]
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Sets the scheduling priority hint.
    ///
    /// Host threads have no portable priority; the hint is only reported.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Returns the driver name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the default config literal.
    #[must_use]
    pub fn default_config(&self) -> Option<&str> {
        self.default_config.as_deref()
    }

    /// Returns the stack size hint.
    #[must_use]
    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Returns the priority hint.
    #[must_use]
    pub fn priority(&self) -> u8 {
        self.priority
    }
}

/// Behaviour of a driver.
///
/// Every hook runs on the driver's own thread. Only [`run`](Self::run) is
/// mandatory; it is invoked once per thread lifetime and is expected to loop
/// until [`DriverContext::is_running`] returns `false`.
pub trait DriverHooks: Send + 'static {
    /// Acquires resources and registers devices.
    ///
    /// # Errors
    ///
    /// A failure leaves the driver `INVALID`.
    fn on_init(&mut self, ctx: &DriverContext) -> Result<(), HookError> {
        let _ = ctx;
        Ok(())
    }

    /// Prepares the main loop.
    ///
    /// # Errors
    ///
    /// A failure leaves the driver `INVALID`.
    fn on_start(&mut self, ctx: &DriverContext) -> Result<(), HookError> {
        let _ = ctx;
        Ok(())
    }

    /// Releases resources after the main loop returned.
    ///
    /// # Errors
    ///
    /// A failure leaves the driver `INVALID`.
    fn on_stop(&mut self, ctx: &DriverContext) -> Result<(), HookError> {
        let _ = ctx;
        Ok(())
    }

    /// Main loop body.
    fn run(&mut self, ctx: &DriverContext);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Init,
    Start,
    Run,
    Stop,
}

/// Progress reported by a driver thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Spawned,
    Initialized,
    Running,
    Stopped,
    Failed(Stage),
}

impl Phase {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }
}

/// One thread lifetime.
#[derive(Debug)]
struct Task {
    signal: RunSignal,
    phase: watch::Receiver<Phase>,
    handle: JoinHandle<()>,
}

type SharedHooks = Arc<Mutex<Box<dyn DriverHooks>>>;

/// A managed driver instance.
pub struct Driver {
    info: DriverInfo,
    state: DriverState,
    hooks: SharedHooks,
    config: DriverConfig,
    devices: DeviceSet,
    events: Option<mpsc::Sender<DriverEvent>>,
    handshake_timeout: Duration,
    task: Option<Task>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("info", &self.info)
            .field("state", &self.state)
            .field("config", &self.config)
            .field("devices", &self.devices.len())
            .field("handshake_timeout", &self.handshake_timeout)
            .finish_non_exhaustive()
    }
}

impl Driver {
    /// Creates a driver in state `NEW`.
    #[must_use]
    pub fn new(info: DriverInfo, hooks: impl DriverHooks) -> Self {
        let config = DriverConfig::empty(info.name());
        Self {
            info,
            state: DriverState::New,
            hooks: Arc::new(Mutex::new(Box::new(hooks))),
            config,
            devices: DeviceSet::new(),
            events: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            task: None,
        }
    }

    /// Sets the bound on every lifecycle handshake.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Attaches the queue device events are emitted into.
    ///
    /// Takes effect at the next [`init`](Self::init).
    pub fn set_event_sender(&mut self, events: mpsc::Sender<DriverEvent>) {
        self.events = Some(events);
    }

    /// Returns the driver name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.info.name()
    }

    /// Returns the static description.
    #[must_use]
    pub fn info(&self) -> &DriverInfo {
        &self.info
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Returns the live device set.
    #[must_use]
    pub fn devices(&self) -> &DeviceSet {
        &self.devices
    }

    /// Parses `config`, spawns the driver thread and waits for `on_init`.
    ///
    /// Invalid or empty config falls back to the default literal, then to an
    /// empty object.
    ///
    /// # Errors
    ///
    /// - [`DriverError::InvalidState`] from `INITIALIZED` or `RUNNING`
    /// - [`DriverError::Spawn`] if the thread cannot be created
    /// - [`DriverError::Timeout`] if `on_init` does not finish in time
    /// - [`DriverError::HookFailed`] if `on_init` fails
    ///
    /// Every error except the state error leaves the driver `INVALID`.
    pub async fn init(&mut self, config: &[u8]) -> Result<(), DriverError> {
        const OP: &str = "init";
        self.check_state(OP, &[DriverState::New, DriverState::Finished, DriverState::Invalid])?;

        self.config = DriverConfig::parse(self.name(), config, self.info.default_config());
        self.devices.clear();
        self.discard_task();

        let signal = RunSignal::new();
        let (phase_tx, phase_rx) = watch::channel(Phase::Spawned);
        let ctx = DriverContext::new(
            self.name().to_string(),
            self.config.clone(),
            signal.clone(),
            self.devices.clone(),
            self.events.clone(),
        );
        let hooks = Arc::clone(&self.hooks);
        let lock_timeout = self.handshake_timeout;

        tracing::debug!(
            driver = %self.name(),
            stack_size = self.info.stack_size(),
            priority = self.info.priority(),
            "Spawning driver thread"
        );
        let spawned = std::thread::Builder::new()
            .name(self.name().to_string())
            .stack_size(self.info.stack_size())
            .spawn(move || driver_thread(&hooks, &ctx, &phase_tx, lock_timeout));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                self.state = DriverState::Invalid;
                tracing::error!(driver = %self.name(), error = %source, "Could not spawn driver thread");
                return Err(DriverError::Spawn {
                    driver: self.name().to_string(),
                    source,
                });
            }
        };
        self.task = Some(Task {
            signal,
            phase: phase_rx,
            handle,
        });

        match self.await_phase(OP, |p| p != Phase::Spawned).await {
            Ok(Phase::Initialized) => {
                self.state = DriverState::Initialized;
                tracing::info!(driver = %self.name(), "Driver initialized");
                Ok(())
            }
            Ok(_) => {
                self.state = DriverState::Invalid;
                Err(self.hook_failed(OP))
            }
            Err(e) => {
                self.state = DriverState::Invalid;
                Err(e)
            }
        }
    }

    /// Starts the main loop and waits for `on_start`.
    ///
    /// # Errors
    ///
    /// - [`DriverError::InvalidState`] unless `INITIALIZED`
    /// - [`DriverError::Timeout`] if `on_start` does not finish in time (state
    ///   unchanged)
    /// - [`DriverError::HookFailed`] if `on_start` fails (state `INVALID`)
    pub async fn start(&mut self) -> Result<(), DriverError> {
        const OP: &str = "start";
        self.check_state(OP, &[DriverState::Initialized])?;
        if let Some(task) = &self.task {
            task.signal.start();
        }

        match self
            .await_phase(OP, |p| p != Phase::Spawned && p != Phase::Initialized)
            .await?
        {
            Phase::Failed(Stage::Init | Stage::Start) => {
                self.state = DriverState::Invalid;
                Err(self.hook_failed(OP))
            }
            _ => {
                self.state = DriverState::Running;
                tracing::info!(driver = %self.name(), "Driver started");
                Ok(())
            }
        }
    }

    /// Asks the main loop to return and waits for the thread to finish.
    ///
    /// From `INVALID` this cleans up whatever thread is left.
    ///
    /// # Errors
    ///
    /// - [`DriverError::InvalidState`] unless `RUNNING` or `INVALID`
    /// - [`DriverError::Timeout`] if the thread does not finish in time
    ///   (state unchanged)
    /// - [`DriverError::HookFailed`] if the main loop or `on_stop` failed
    ///   (state `INVALID`)
    pub async fn stop(&mut self) -> Result<(), DriverError> {
        const OP: &str = "stop";
        self.check_state(OP, &[DriverState::Running, DriverState::Invalid])?;
        let was_running = self.state == DriverState::Running;

        if let Some(task) = &self.task {
            task.signal.halt();
        }
        let phase = self.await_phase(OP, Phase::is_terminal).await?;
        self.task = None;

        match phase {
            Phase::Failed(Stage::Run | Stage::Stop) if was_running => {
                self.state = DriverState::Invalid;
                Err(self.hook_failed(OP))
            }
            _ => {
                self.state = DriverState::Finished;
                tracing::info!(driver = %self.name(), "Driver stopped");
                Ok(())
            }
        }
    }

    /// Cancels an initialized driver that was never started.
    ///
    /// The thread exits without running `on_start`, `run` or `on_stop`.
    ///
    /// # Errors
    ///
    /// - [`DriverError::InvalidState`] unless `INITIALIZED`
    /// - [`DriverError::Timeout`] if the thread does not finish in time
    pub async fn reset(&mut self) -> Result<(), DriverError> {
        const OP: &str = "reset";
        self.check_state(OP, &[DriverState::Initialized])?;

        if let Some(task) = &self.task {
            task.signal.halt();
        }
        self.await_phase(OP, Phase::is_terminal).await?;
        self.task = None;
        self.state = DriverState::Finished;
        tracing::info!(driver = %self.name(), "Driver reset");
        Ok(())
    }

    fn check_state(
        &self,
        operation: &'static str,
        allowed: &[DriverState],
    ) -> Result<(), DriverError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            tracing::warn!(driver = %self.name(), operation, state = %self.state, "Invalid driver state");
            Err(DriverError::InvalidState {
                driver: self.name().to_string(),
                operation,
                state: self.state,
            })
        }
    }

    fn hook_failed(&self, operation: &'static str) -> DriverError {
        DriverError::HookFailed {
            driver: self.name().to_string(),
            operation,
        }
    }

    /// Drops the handle of a previous thread lifetime.
    fn discard_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.signal.halt();
            if !task.handle.is_finished() {
                tracing::warn!(driver = %self.name(), "Detaching stale driver thread");
            }
        }
    }

    /// Waits until the thread reports a phase accepted by `accept`.
    ///
    /// A thread that vanished without reporting counts as failed.
    async fn await_phase<F>(&mut self, operation: &'static str, accept: F) -> Result<Phase, DriverError>
    where
        F: Fn(Phase) -> bool,
    {
        let Some(task) = self.task.as_mut() else {
            return Ok(Phase::Stopped);
        };

        let wait = async {
            task.phase
                .wait_for(|p| accept(*p))
                .await
                .map(|phase| *phase)
                .unwrap_or(Phase::Failed(Stage::Init))
        };

        match tokio::time::timeout(self.handshake_timeout, wait).await {
            Ok(phase) => Ok(phase),
            Err(_) => {
                let timeout_ms =
                    u64::try_from(self.handshake_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::error!(driver = %self.info.name(), operation, timeout_ms, "Driver handshake timed out");
                Err(DriverError::Timeout {
                    driver: self.info.name().to_string(),
                    operation,
                    timeout_ms,
                })
            }
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.signal.halt();
        }
    }
}

/// Body of a driver thread.
///
/// The terminal phase is reported only after the hooks lock is released, so
/// a new lifetime can take the hooks as soon as the control side sees it.
fn driver_thread(
    hooks: &SharedHooks,
    ctx: &DriverContext,
    phase: &watch::Sender<Phase>,
    lock_timeout: Duration,
) {
    let terminal = match hooks.try_lock_for(lock_timeout) {
        Some(mut guard) => drive(&mut **guard, ctx, phase),
        None => {
            tracing::error!(driver = %ctx.name(), "Driver hooks still held by a previous thread");
            Phase::Failed(Stage::Init)
        }
    };
    phase.send_replace(terminal);
}

fn drive(hooks: &mut dyn DriverHooks, ctx: &DriverContext, phase: &watch::Sender<Phase>) -> Phase {
    if guarded(ctx, "init", || hooks.on_init(ctx)).is_err() {
        return Phase::Failed(Stage::Init);
    }
    phase.send_replace(Phase::Initialized);

    if !ctx.signal().wait_started() {
        tracing::debug!(driver = %ctx.name(), "Driver cancelled before start");
        return Phase::Stopped;
    }

    if guarded(ctx, "start", || hooks.on_start(ctx)).is_err() {
        return Phase::Failed(Stage::Start);
    }
    phase.send_replace(Phase::Running);

    if guarded(ctx, "run", || {
        hooks.run(ctx);
        Ok(())
    })
    .is_err()
    {
        return Phase::Failed(Stage::Run);
    }

    if guarded(ctx, "stop", || hooks.on_stop(ctx)).is_err() {
        return Phase::Failed(Stage::Stop);
    }
    Phase::Stopped
}

/// Runs a hook, turning panics into errors.
fn guarded<F>(ctx: &DriverContext, hook: &'static str, f: F) -> Result<(), HookError>
where
    F: FnOnce() -> Result<(), HookError>,
{
    let result = catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|_| Err(HookError::new(format!("{hook} hook panicked"))));
    if let Err(e) = &result {
        tracing::error!(driver = %ctx.name(), hook, error = %e, "Driver hook failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::device::Device;

    /// Configurable hooks recording what ran.
    #[derive(Default)]
    struct Probe {
        calls: Arc<Mutex<Vec<&'static str>>>,
        init_delay: Duration,
        fail_init: bool,
        fail_start: bool,
        fail_stop: bool,
        panic_init: bool,
    }

    impl DriverHooks for Probe {
        fn on_init(&mut self, ctx: &DriverContext) -> Result<(), HookError> {
            self.calls.lock().push("init");
            std::thread::sleep(self.init_delay);
            assert!(!self.panic_init, "probe init panic");
            if self.fail_init {
                return Err(HookError::new("init refused"));
            }
            ctx.add_device(Device::sensor(
                ctx.config().get_str("uid", "probe"),
                "",
                0,
            ));
            Ok(())
        }

        fn on_start(&mut self, _ctx: &DriverContext) -> Result<(), HookError> {
            self.calls.lock().push("start");
            if self.fail_start {
                return Err(HookError::new("start refused"));
            }
            Ok(())
        }

        fn on_stop(&mut self, _ctx: &DriverContext) -> Result<(), HookError> {
            self.calls.lock().push("stop");
            if self.fail_stop {
                return Err(HookError::new("stop refused"));
            }
            Ok(())
        }

        fn run(&mut self, ctx: &DriverContext) {
            self.calls.lock().push("run");
            while ctx.sleep(Duration::from_millis(5)) {}
        }
    }

    fn driver(probe: Probe) -> Driver {
        Driver::new(
            DriverInfo::new("probe").with_default_config(r#"{"uid": "fallback"}"#),
            probe,
        )
        .with_handshake_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut drv = driver(Probe {
            calls: Arc::clone(&calls),
            ..Probe::default()
        });
        assert_eq!(drv.state(), DriverState::New);

        drv.init(br#"{"uid": "x"}"#).await.unwrap();
        assert_eq!(drv.state(), DriverState::Initialized);
        assert!(drv.devices().get("x").is_some());

        drv.start().await.unwrap();
        assert_eq!(drv.state(), DriverState::Running);

        drv.stop().await.unwrap();
        assert_eq!(drv.state(), DriverState::Finished);
        assert_eq!(*calls.lock(), vec!["init", "start", "run", "stop"]);

        drv.init(b"").await.unwrap();
        assert_eq!(drv.state(), DriverState::Initialized);
        assert!(drv.devices().get("fallback").is_some());
        assert!(drv.devices().get("x").is_none());
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let mut drv = driver(Probe::default());

        assert!(matches!(
            drv.start().await,
            Err(DriverError::InvalidState { state: DriverState::New, .. })
        ));
        assert!(matches!(drv.stop().await, Err(DriverError::InvalidState { .. })));
        assert!(matches!(drv.reset().await, Err(DriverError::InvalidState { .. })));

        drv.init(b"").await.unwrap();
        assert!(matches!(drv.init(b"").await, Err(DriverError::InvalidState { .. })));
        assert!(matches!(drv.stop().await, Err(DriverError::InvalidState { .. })));

        drv.start().await.unwrap();
        assert!(matches!(drv.init(b"").await, Err(DriverError::InvalidState { .. })));
        assert!(matches!(drv.start().await, Err(DriverError::InvalidState { .. })));
        assert_eq!(drv.state(), DriverState::Running);

        drv.stop().await.unwrap();
        assert!(matches!(drv.stop().await, Err(DriverError::InvalidState { .. })));
        assert!(matches!(drv.start().await, Err(DriverError::InvalidState { .. })));
        assert_eq!(drv.state(), DriverState::Finished);
    }

    #[tokio::test]
    async fn slow_init_times_out_to_invalid() {
        let mut drv = driver(Probe {
            init_delay: Duration::from_millis(600),
            ..Probe::default()
        });

        let err = drv.init(b"").await.unwrap_err();
        assert!(matches!(
            err,
            DriverError::Timeout {
                operation: "init",
                timeout_ms: 200,
                ..
            }
        ));
        assert_eq!(drv.state(), DriverState::Invalid);
    }

    #[tokio::test]
    async fn failing_init_hook_is_invalid() {
        let mut drv = driver(Probe {
            fail_init: true,
            ..Probe::default()
        });
        assert!(matches!(
            drv.init(b"").await,
            Err(DriverError::HookFailed { operation: "init", .. })
        ));
        assert_eq!(drv.state(), DriverState::Invalid);

        drv.stop().await.unwrap();
        assert_eq!(drv.state(), DriverState::Finished);
    }

    #[tokio::test]
    async fn panicking_init_hook_is_invalid() {
        let mut drv = driver(Probe {
            panic_init: true,
            ..Probe::default()
        });
        assert!(matches!(
            drv.init(b"").await,
            Err(DriverError::HookFailed { .. })
        ));
        assert_eq!(drv.state(), DriverState::Invalid);
    }

    #[tokio::test]
    async fn failing_start_hook_is_invalid() {
        let mut drv = driver(Probe {
            fail_start: true,
            ..Probe::default()
        });
        drv.init(b"").await.unwrap();
        assert!(matches!(
            drv.start().await,
            Err(DriverError::HookFailed { operation: "start", .. })
        ));
        assert_eq!(drv.state(), DriverState::Invalid);

        drv.stop().await.unwrap();
        assert_eq!(drv.state(), DriverState::Finished);
    }

    #[tokio::test]
    async fn failing_stop_hook_is_invalid() {
        let mut drv = driver(Probe {
            fail_stop: true,
            ..Probe::default()
        });
        drv.init(b"").await.unwrap();
        drv.start().await.unwrap();
        assert!(matches!(
            drv.stop().await,
            Err(DriverError::HookFailed { operation: "stop", .. })
        ));
        assert_eq!(drv.state(), DriverState::Invalid);
    }

    #[tokio::test]
    async fn reset_skips_main_loop() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut drv = driver(Probe {
            calls: Arc::clone(&calls),
            ..Probe::default()
        });
        drv.init(b"").await.unwrap();
        drv.reset().await.unwrap();
        assert_eq!(drv.state(), DriverState::Finished);
        assert_eq!(*calls.lock(), vec!["init"]);

        drv.init(b"").await.unwrap();
        assert_eq!(drv.state(), DriverState::Initialized);
    }

    #[tokio::test]
    async fn loop_that_returns_early_still_stops() {
        struct OneShot(Arc<AtomicUsize>);
        impl DriverHooks for OneShot {
            fn run(&mut self, _ctx: &DriverContext) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let runs = Arc::new(AtomicUsize::new(0));
        let mut drv = Driver::new(DriverInfo::new("oneshot"), OneShot(Arc::clone(&runs)));
        drv.init(b"").await.unwrap();
        drv.start().await.unwrap();
        assert_eq!(drv.state(), DriverState::Running);
        drv.stop().await.unwrap();
        assert_eq!(drv.state(), DriverState::Finished);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn state_names() {
        assert_eq!(DriverState::New.to_string(), "NEW");
        assert_eq!(DriverState::Initialized.to_string(), "INITIALIZED");
        assert_eq!(DriverState::Running.to_string(), "RUNNING");
        assert_eq!(DriverState::Finished.to_string(), "FINISHED");
        assert_eq!(DriverState::Invalid.to_string(), "INVALID");
    }
}
