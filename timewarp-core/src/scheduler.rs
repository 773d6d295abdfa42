//! ## timewarp-core::scheduler
//! **Virtual-clock scheduler and the operations it exposes**
//!
//! A thread that has to wait registers a [`WaitKind`] entry under the core
//! lock, drops the lock and blocks on its private waiter. Moving the clock
//! runs the resolver, which wakes due entries one at a time in deadline order
//! and waits for each woken thread to deregister before touching the next.
//!
//! Every time or blocking call takes an [`Activation`]. Only `Virtual` calls
//! made while the scheduler is started go through the virtual clock; all
//! others use the real primitives.

use std::collections::HashSet;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread, ThreadId};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex, MutexGuard};
use timewarp_config::SchedulerConfig;
use timewarp_telemetry::MetricsRecorder;
use tracing::{debug, error, info, instrument, trace};

use crate::clock::{effective_millis, split_nanos, Deadline, VirtualClock};
use crate::directory::ThreadDirectory;
use crate::error::{ActivationOrigin, TimeError};
use crate::freeze::{FreezeDetector, RegistryView};
use crate::monitor::{Monitor, MonitorId};
use crate::park::ParkTable;
use crate::registry::{WaitKey, WaitKind, WaitRegistry, Waiter, Wakeup};

/// Whether a call site runs as part of the code under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Virtual,
    Passthrough,
}

#[derive(Debug, Clone, Copy)]
enum Timeout {
    Indefinite,
    After(u64),
    Until(u64),
}

#[derive(Default)]
struct Core {
    registry: WaitRegistry,
    permits: ParkTable,
    interrupts: HashSet<ThreadId>,
    excluded: HashSet<ThreadId>,
    origin: Option<ActivationOrigin>,
}

struct Registration {
    key: WaitKey,
    waiter: Arc<Waiter>,
}

/// Keeps the calling thread in the "about to wait" set until dropped.
struct RegisteringMark<'a> {
    set: &'a Mutex<HashSet<ThreadId>>,
    thread: ThreadId,
}

impl<'a> RegisteringMark<'a> {
    fn new(set: &'a Mutex<HashSet<ThreadId>>, thread: ThreadId) -> Self {
        set.lock().insert(thread);
        Self { set, thread }
    }
}

impl Drop for RegisteringMark<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.thread);
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    clock: VirtualClock,
    active: AtomicBool,
    core: Mutex<Core>,
    /// Notified whenever a wait leaves the registry.
    released: Condvar,
    /// Serializes clock moves, including their rendezvous.
    advancing: Mutex<()>,
    registering: Mutex<HashSet<ThreadId>>,
    detector: FreezeDetector,
    metrics: MetricsRecorder,
    created: Instant,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, directory: Arc<dyn ThreadDirectory>) -> Self {
        let detector = FreezeDetector::new(
            directory,
            Duration::from_millis(config.freeze_poll_interval_ms),
            config.warn_on_foreign_timed_waits,
        );
        Self {
            config,
            clock: VirtualClock::default(),
            active: AtomicBool::new(false),
            core: Mutex::new(Core::default()),
            released: Condvar::new(),
            advancing: Mutex::new(()),
            registering: Mutex::new(HashSet::new()),
            detector,
            metrics: MetricsRecorder::new(),
            created: Instant::now(),
        }
    }

    /// Replaces the scheduler's own metrics, e.g. to share one registry.
    pub fn with_metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn metrics(&self) -> &MetricsRecorder {
        &self.metrics
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Current virtual time, whatever the activation.
    pub fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Earliest instant at which a suspended wait becomes due.
    pub fn next_deadline(&self) -> Option<u64> {
        match self.core.lock().registry.earliest_deadline() {
            Some(Deadline::At(instant)) => Some(instant),
            Some(Deadline::Never) | None => None,
        }
    }

    fn virtualizes(&self, cx: Activation) -> bool {
        cx == Activation::Virtual && self.is_active()
    }

    // ========== Lifecycle ==========

    /// Starts virtual time at `start_instant`, the configured start instant,
    /// or the current wall-clock millis, in that order of preference.
    ///
    /// Threads the directory lists at this point are ignored by
    /// [`Scheduler::wait_until_frozen`].
    #[track_caller]
    pub fn start(&self, start_instant: Option<u64>) -> Result<(), TimeError> {
        let caller = Location::caller();
        let _serial = self.advancing.lock();
        let excluded: HashSet<ThreadId> = self
            .detector
            .directory()
            .enumerate()
            .into_iter()
            .map(|record| record.id)
            .collect();

        let mut core = self.core.lock();
        if let Some(origin) = &core.origin {
            error!(previous = %origin, "virtual clock is started already");
            return Err(TimeError::AlreadyActive {
                origin: origin.clone(),
            });
        }

        let start = start_instant
            .or(self.config.start_instant)
            .unwrap_or_else(wall_clock_millis);
        core.excluded = excluded;
        core.origin = Some(ActivationOrigin::capture(caller));
        self.clock.store(start);
        self.active.store(true, Ordering::Release);
        info!(start, at = %caller, "virtual clock started");
        Ok(())
    }

    /// Deactivates the virtual clock and returns it to zero.
    ///
    /// Suspended threads are released at once, without ordering; permits,
    /// pending interrupts and the start snapshot are forgotten.
    pub fn reset(&self) {
        let _serial = self.advancing.lock();
        let mut core = self.core.lock();
        let released = core.registry.resume_all();
        for waiter in &released {
            waiter.signal();
        }
        core.permits.clear();
        core.interrupts.clear();
        core.excluded.clear();
        core.origin = None;
        self.clock.store(0);
        self.active.store(false, Ordering::Release);
        info!(released = released.len(), "virtual clock reset");
    }

    #[instrument(skip(self))]
    pub fn set_time(&self, instant: u64) -> Result<(), TimeError> {
        self.move_clock(|clock| clock.check_target(instant))
    }

    #[instrument(skip(self))]
    pub fn advance_time(&self, delta: i64) -> Result<(), TimeError> {
        if delta < 0 {
            return Err(TimeError::InvalidArgument(format!(
                "time delta is negative: {delta}"
            )));
        }
        self.move_clock(|clock| clock.advance_target(delta))
    }

    fn move_clock(
        &self,
        target: impl FnOnce(&VirtualClock) -> Result<u64, TimeError>,
    ) -> Result<(), TimeError> {
        let _serial = self.advancing.lock();
        let mut core = self.core.lock();
        if core.origin.is_none() {
            return Err(TimeError::NotActive);
        }
        let now = target(&self.clock)?;
        self.clock.store(now);
        self.metrics.clock_moves.inc();
        debug!(now, "virtual time moved");
        self.resolve(&mut core, now);
        Ok(())
    }

    /// Wakes every wait due at `now`, earliest first, each one fully handed
    /// off before the next.
    fn resolve(&self, core: &mut MutexGuard<'_, Core>, now: u64) {
        while let Some(key) = core.registry.next_due(now) {
            let thread = core.registry.get(key).map(|entry| entry.thread);
            let waiter = core
                .registry
                .mark_resumed(key)
                .expect("due wait must be registered and not yet resumed");
            waiter.signal();
            self.metrics.resumptions.inc();
            trace!(?key, ?thread, now, "resumed due wait");
            while core.registry.contains(key) {
                self.released.wait(core);
            }
        }
    }

    // ========== Time ==========

    pub fn time_millis(&self, cx: Activation) -> u64 {
        if self.virtualizes(cx) {
            self.clock.now_ms()
        } else {
            wall_clock_millis()
        }
    }

    pub fn nano_time(&self, cx: Activation) -> u64 {
        if self.virtualizes(cx) {
            self.clock.now_ms().saturating_mul(1_000_000)
        } else {
            self.created.elapsed().as_nanos() as u64
        }
    }

    // ========== Waiting ==========

    /// Sleeps `millis` plus `nanos`. A zero duration returns at once.
    pub fn sleep(&self, cx: Activation, millis: i64, nanos: i32) -> Result<(), TimeError> {
        let effective = effective_millis(millis, nanos)?;
        if effective == 0 {
            return Ok(());
        }
        if !self.virtualizes(cx) {
            thread::sleep(real_duration(millis, nanos));
            return Ok(());
        }
        self.suspend(WaitKind::Sleep, None, Timeout::After(effective))
    }

    /// Waits on `monitor`, releasing the lock behind `guard` while suspended.
    /// A zero timeout waits until notified.
    pub fn wait_on<T: ?Sized>(
        &self,
        cx: Activation,
        monitor: &Monitor,
        guard: &mut MutexGuard<'_, T>,
        millis: i64,
        nanos: i32,
    ) -> Result<(), TimeError> {
        let effective = effective_millis(millis, nanos)?;
        if !self.virtualizes(cx) {
            if effective == 0 {
                monitor.condvar().wait(guard);
            } else {
                monitor.condvar().wait_for(guard, real_duration(millis, nanos));
            }
            return Ok(());
        }

        let timeout = match effective {
            0 => Timeout::Indefinite,
            millis => Timeout::After(millis),
        };
        // Registered while the caller still holds its lock, so a notifier
        // taking the same lock cannot miss this waiter.
        match self.register(WaitKind::Monitor, Some(monitor.id()), timeout)? {
            Some(registration) => MutexGuard::unlocked(guard, || self.complete(registration)),
            None => Ok(()),
        }
    }

    pub fn wait<T: ?Sized>(
        &self,
        cx: Activation,
        monitor: &Monitor,
        guard: &mut MutexGuard<'_, T>,
    ) -> Result<(), TimeError> {
        self.wait_on(cx, monitor, guard, 0, 0)
    }

    pub fn notify(&self, cx: Activation, monitor: &Monitor) {
        if self.virtualizes(cx) {
            self.signal(monitor.id(), false);
        } else {
            monitor.condvar().notify_one();
        }
    }

    pub fn notify_all(&self, cx: Activation, monitor: &Monitor) {
        if self.virtualizes(cx) {
            self.signal(monitor.id(), true);
        } else {
            monitor.condvar().notify_all();
        }
    }

    fn signal(&self, monitor: MonitorId, all: bool) {
        let mut core = self.core.lock();
        self.signal_locked(&mut core, monitor, all);
    }

    fn signal_locked(&self, core: &mut Core, monitor: MonitorId, all: bool) {
        let mut keys = core.registry.monitor_waiters(monitor);
        if !all {
            keys.truncate(1);
        }
        for key in keys {
            if let Some(waiter) = core.registry.mark_resumed(key) {
                waiter.signal();
                self.metrics.signals.inc();
                trace!(?key, ?monitor, "notified waiter");
            }
        }
    }

    // ========== Parking ==========

    /// Parks the calling thread.
    ///
    /// Relative: `time` is in nanoseconds and `0` parks until unparked.
    /// Absolute: `time` is the instant in milliseconds to wake at.
    pub fn park(&self, cx: Activation, absolute: bool, time: i64) -> Result<(), TimeError> {
        let timeout = if absolute {
            if time < 0 {
                return Err(TimeError::InvalidArgument(format!(
                    "park deadline is negative: {time}"
                )));
            }
            Timeout::Until(time as u64)
        } else {
            let (millis, nanos) = split_nanos(time);
            match effective_millis(millis, nanos)? {
                0 => Timeout::Indefinite,
                millis => Timeout::After(millis),
            }
        };

        if !self.virtualizes(cx) {
            match timeout {
                Timeout::Indefinite => thread::park(),
                Timeout::After(_) => thread::park_timeout(Duration::from_nanos(time as u64)),
                Timeout::Until(instant) => {
                    let remaining = instant.saturating_sub(wall_clock_millis());
                    if remaining > 0 {
                        thread::park_timeout(Duration::from_millis(remaining));
                    }
                }
            }
            return Ok(());
        }
        self.suspend(WaitKind::Park, None, timeout)
    }

    pub fn park_nanos(&self, cx: Activation, nanos: i64) -> Result<(), TimeError> {
        self.park(cx, false, nanos)
    }

    pub fn park_until(&self, cx: Activation, instant: u64) -> Result<(), TimeError> {
        self.park(cx, true, i64::try_from(instant).unwrap_or(i64::MAX))
    }

    pub fn park_indefinitely(&self, cx: Activation) -> Result<(), TimeError> {
        self.park(cx, false, 0)
    }

    /// Wakes `thread` if it is parked, otherwise leaves it a permit.
    pub fn unpark(&self, cx: Activation, thread: &Thread) {
        if !self.virtualizes(cx) {
            thread.unpark();
            return;
        }
        let id = thread.id();
        let mut core = self.core.lock();
        let parked = core.registry.park_of(id);
        match parked.and_then(|key| core.registry.mark_resumed(key)) {
            Some(waiter) => {
                waiter.signal();
                self.metrics.signals.inc();
                trace!(thread = ?id, "unparked thread");
            }
            None => core.permits.grant(id),
        }
    }

    // ========== Interruption ==========

    /// Interrupts `thread`: a wait it is in fails with
    /// [`TimeError::Interrupted`], even when a wake-up is already on its way;
    /// otherwise its next suspending call does.
    pub fn interrupt(&self, thread: ThreadId) {
        let mut core = self.core.lock();
        self.interrupt_locked(&mut core, thread);
    }

    fn interrupt_locked(&self, core: &mut Core, thread: ThreadId) {
        match core.registry.wait_of(thread) {
            Some(key) => {
                if let Some(waiter) = core.registry.mark_interrupted(key) {
                    waiter.interrupt();
                    debug!(?thread, ?key, "interrupt delivered to wait");
                }
            }
            None => {
                core.interrupts.insert(thread);
                debug!(?thread, "interrupt left pending");
            }
        }
    }

    /// Reports and clears a pending interrupt of the calling thread.
    pub fn interrupted(&self) -> bool {
        self.core.lock().interrupts.remove(&thread::current().id())
    }

    fn suspend(
        &self,
        kind: WaitKind,
        monitor: Option<MonitorId>,
        timeout: Timeout,
    ) -> Result<(), TimeError> {
        match self.register(kind, monitor, timeout)? {
            Some(registration) => self.complete(registration),
            None => Ok(()),
        }
    }

    /// Adds a wait for the calling thread. `None` means it must not block.
    fn register(
        &self,
        kind: WaitKind,
        monitor: Option<MonitorId>,
        timeout: Timeout,
    ) -> Result<Option<Registration>, TimeError> {
        let thread = thread::current().id();
        let _registering = RegisteringMark::new(&self.registering, thread);
        let mut core = self.core.lock();

        // A reset that raced with this call released it already.
        if core.origin.is_none() {
            return Ok(None);
        }
        if core.interrupts.remove(&thread) {
            return Err(TimeError::Interrupted);
        }
        if kind == WaitKind::Park && core.permits.take(thread) {
            return Ok(None);
        }

        let now = self.clock.now_ms();
        let deadline = match timeout {
            Timeout::Indefinite => Deadline::Never,
            Timeout::After(millis) => Deadline::after(now, millis),
            Timeout::Until(instant) => Deadline::At(instant),
        };
        if deadline.is_due(now) {
            return Ok(None);
        }

        let waiter = Waiter::new();
        let key = core
            .registry
            .insert(thread, kind, monitor, deadline, waiter.clone());
        self.metrics
            .suspended_threads
            .set(core.registry.len() as i64);
        debug!(?kind, ?deadline, now, "thread suspended on virtual clock");
        Ok(Some(Registration { key, waiter }))
    }

    /// Blocks until the wait is resumed or interrupted, then deregisters it.
    fn complete(&self, registration: Registration) -> Result<(), TimeError> {
        let Registration { key, waiter } = registration;
        loop {
            let wakeup = waiter.block();
            let mut core = self.core.lock();
            let (resumed, interrupted) = core
                .registry
                .get(key)
                .map_or((true, false), |entry| (entry.resumed, entry.interrupted));
            let interrupted = interrupted || wakeup == Wakeup::Interrupted;
            if !resumed && !interrupted {
                waiter.clear_signal();
                continue;
            }

            core.registry.remove(key);
            self.metrics
                .suspended_threads
                .set(core.registry.len() as i64);
            self.released.notify_all();
            if interrupted {
                debug!(?key, resumed, "suspended wait interrupted");
                return Err(TimeError::Interrupted);
            }
            return Ok(());
        }
    }

    // ========== Settling ==========

    /// Waits, in real time, until every thread started after [`Scheduler::start`]
    /// is terminated or suspended in a recognized wait.
    #[instrument(skip(self))]
    pub fn wait_until_frozen(&self, timeout_ms: u64) -> Result<(), TimeError> {
        let result = self
            .detector
            .wait_until_frozen(Duration::from_millis(timeout_ms), || self.registry_view());
        if result.is_err() {
            self.metrics.settle_timeouts.inc();
        }
        result
    }

    pub fn wait_until_frozen_default(&self) -> Result<(), TimeError> {
        self.wait_until_frozen(self.config.settle_timeout_ms)
    }

    fn registry_view(&self) -> RegistryView {
        let core = self.core.lock();
        let (suspended, waking) = core.registry.thread_states();
        RegistryView {
            suspended,
            waking,
            registering: self.registering.lock().clone(),
            excluded: core.excluded.clone(),
        }
    }
}

pub(crate) fn wall_clock_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

fn real_duration(millis: i64, nanos: i32) -> Duration {
    Duration::from_millis(millis as u64) + Duration::from_nanos(nanos as u64)
}
