//! Delayed callbacks used to expire pending transactions.
//!
//! [`ThreadTimer`] runs callbacks on a dedicated `tether-timer` thread, which
//! is distinct from the dispatch thread. Cancellation is best effort: a
//! callback that has already been taken off the queue still runs, so every
//! callback must re-check whatever state it acts on.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, warn};

pub(crate) const TIMER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::timer");

/// Callback executed when a timeout elapses.
pub type TimeoutCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled callback for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Raw handle value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Schedules callbacks after a delay.
pub trait TimeoutScheduler: Send + Sync {
    /// Arms `callback` to run once `delay` has elapsed.
    fn schedule(&self, delay: Duration, callback: TimeoutCallback) -> TimerHandle;

    /// Cancels a scheduled callback if it has not started yet.
    ///
    /// Cancelling an unknown or already-fired handle does nothing.
    fn cancel(&self, handle: TimerHandle);
}

impl<T> TimeoutScheduler for Arc<T>
where
    T: TimeoutScheduler + ?Sized,
{
    fn schedule(&self, delay: Duration, callback: TimeoutCallback) -> TimerHandle {
        (**self).schedule(delay, callback)
    }

    fn cancel(&self, handle: TimerHandle) {
        (**self).cancel(handle);
    }
}

/// Errors raised by the timer thread.
#[derive(Debug, Error)]
pub enum TimerError {
    /// The timer thread could not be spawned.
    #[error("failed to spawn timer thread: {source}")]
    Spawn {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A callback panicked and took the timer thread down.
    #[error("timer thread panicked")]
    ThreadPanic,
}

#[derive(Default)]
struct TimerState {
    next_handle: u64,
    deadlines: BinaryHeap<Reverse<(Instant, u64)>>,
    callbacks: HashMap<u64, TimeoutCallback>,
    shutdown: bool,
}

#[derive(Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    wakeup: Condvar,
}

impl TimerShared {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Timeout scheduler backed by a dedicated thread.
pub struct ThreadTimer {
    shared: Arc<TimerShared>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl ThreadTimer {
    /// Spawns the timer thread.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::Spawn`] when the OS refuses to create the thread.
    pub fn start() -> Result<Self, TimerError> {
        let shared = Arc::new(TimerShared::default());
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(String::from("tether-timer"))
            .spawn(move || run_timer_loop(&worker_shared))
            .map_err(|source| TimerError::Spawn { source })?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Number of callbacks still waiting to fire.
    #[must_use]
    pub fn scheduled(&self) -> usize {
        self.shared.lock().callbacks.len()
    }

    /// Stops the timer thread and drops every callback that has not fired.
    ///
    /// # Errors
    ///
    /// Returns [`TimerError::ThreadPanic`] if the timer thread panicked.
    pub fn shutdown(&self) -> Result<(), TimerError> {
        self.signal_shutdown();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        match worker {
            Some(handle) if handle.thread().id() != thread::current().id() => {
                handle.join().map_err(|_| TimerError::ThreadPanic)
            }
            _ => Ok(()),
        }
    }

    fn signal_shutdown(&self) {
        let mut state = self.shared.lock();
        state.shutdown = true;
        state.callbacks.clear();
        state.deadlines.clear();
        drop(state);
        self.shared.wakeup.notify_all();
    }
}

impl TimeoutScheduler for ThreadTimer {
    fn schedule(&self, delay: Duration, callback: TimeoutCallback) -> TimerHandle {
        let mut state = self.shared.lock();
        let handle = TimerHandle(state.next_handle);
        state.next_handle = state.next_handle.wrapping_add(1);
        if state.shutdown {
            warn!(
                target: TIMER_TARGET,
                handle = handle.get(),
                "timer stopped; dropping scheduled callback"
            );
            return handle;
        }
        let deadline = Instant::now() + delay;
        state.deadlines.push(Reverse((deadline, handle.get())));
        state.callbacks.insert(handle.get(), callback);
        drop(state);
        self.shared.wakeup.notify_all();
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        if self.shared.lock().callbacks.remove(&handle.get()).is_some() {
            debug!(target: TIMER_TARGET, handle = handle.get(), "timeout cancelled");
        }
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        self.signal_shutdown();
    }
}

fn run_timer_loop(shared: &TimerShared) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            return;
        }
        let Some(Reverse((deadline, raw))) = state.deadlines.peek().copied() else {
            state = shared
                .wakeup
                .wait(state)
                .unwrap_or_else(|poison| poison.into_inner());
            continue;
        };
        let now = Instant::now();
        if deadline > now {
            state = shared
                .wakeup
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poison| poison.into_inner().0);
            continue;
        }
        state.deadlines.pop();
        // Cancelled handles leave their deadline behind; skip them lazily.
        let Some(callback) = state.callbacks.remove(&raw) else {
            continue;
        };
        drop(state);
        // A panicking callback must not take later expiries down with it.
        if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
            error!(
                target: TIMER_TARGET,
                handle = raw,
                "timeout callback panicked; continuing"
            );
        }
        state = shared.lock();
    }
}

/// Scheduler that only fires when told to, for deterministic tests.
///
/// Time is virtual: [`ManualTimer::advance`] moves the clock forward and
/// fires every due callback in deadline order.
#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
pub struct ManualTimer {
    state: Mutex<ManualState>,
}

#[cfg(any(test, feature = "test-support"))]
#[derive(Default)]
struct ManualState {
    now: Duration,
    next_handle: u64,
    entries: Vec<ManualEntry>,
}

#[cfg(any(test, feature = "test-support"))]
struct ManualEntry {
    handle: u64,
    due: Duration,
    cancelled: bool,
    callback: TimeoutCallback,
}

#[cfg(any(test, feature = "test-support"))]
impl ManualTimer {
    /// Creates a timer at virtual time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of callbacks that are armed and not cancelled.
    #[must_use]
    pub fn armed(&self) -> usize {
        self.lock()
            .entries
            .iter()
            .filter(|entry| !entry.cancelled)
            .count()
    }

    /// Returns `true` once `handle` has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self, handle: TimerHandle) -> bool {
        self.lock()
            .entries
            .iter()
            .any(|entry| entry.handle == handle.get() && entry.cancelled)
    }

    /// Moves virtual time forward and fires every due, uncancelled callback.
    pub fn advance(&self, by: Duration) -> usize {
        let due = {
            let mut state = self.lock();
            state.now += by;
            let now = state.now;
            let (mut due, pending): (Vec<_>, Vec<_>) = state
                .entries
                .drain(..)
                .partition(|entry| entry.due <= now);
            state.entries = pending;
            due.retain(|entry| !entry.cancelled);
            due.sort_by_key(|entry| entry.due);
            due
        };
        let fired = due.len();
        for entry in due {
            (entry.callback)();
        }
        fired
    }

    /// Fires every remaining callback, cancelled ones included.
    ///
    /// Models a cancellation that lost the race against the timer thread.
    pub fn fire_all_ignoring_cancellation(&self) -> usize {
        let entries: Vec<_> = self.lock().entries.drain(..).collect();
        let fired = entries.len();
        for entry in entries {
            (entry.callback)();
        }
        fired
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

#[cfg(any(test, feature = "test-support"))]
impl TimeoutScheduler for ManualTimer {
    fn schedule(&self, delay: Duration, callback: TimeoutCallback) -> TimerHandle {
        let mut state = self.lock();
        let handle = state.next_handle;
        state.next_handle += 1;
        let due = state.now + delay;
        state.entries.push(ManualEntry {
            handle,
            due,
            cancelled: false,
            callback,
        });
        TimerHandle(handle)
    }

    fn cancel(&self, handle: TimerHandle) {
        if let Some(entry) = self
            .lock()
            .entries
            .iter_mut()
            .find(|entry| entry.handle == handle.get())
        {
            entry.cancelled = true;
        }
    }
}
