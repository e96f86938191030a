//! Single-threaded dispatch of stimuli in arrival order.
//!
//! Producers hold a cloneable [`DispatchHandle`] and push stimuli into a
//! bounded channel. One thread, named `tether-dispatch`, drains the channel
//! and calls the router synchronously, so handler modules never run
//! concurrently with each other.

use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError, TrySendError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::router::DispatchRouter;
use crate::stimulus::{DispatchTask, Intent, Stimulus};
use crate::timer::{TimeoutScheduler, TimerHandle};

pub(crate) const LOOP_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::loop");

/// Errors raised while feeding or running the dispatch loop.
#[derive(Debug, Error)]
pub enum DispatchLoopError {
    /// The loop has stopped and accepts no more stimuli.
    #[error("dispatch loop is not running")]
    Closed,
    /// The queue is full and the caller asked not to block.
    #[error("dispatch queue is full")]
    QueueFull,
    /// The dispatch thread could not be spawned.
    #[error("failed to spawn dispatch thread: {source}")]
    Spawn {
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },
    /// A handler panicked and took the dispatch thread down.
    #[error("dispatch thread panicked")]
    ThreadPanic,
}

enum Envelope {
    Stimulus(Stimulus),
    Shutdown,
}

/// Cloneable producer side of the dispatch queue.
#[derive(Clone)]
pub struct DispatchHandle {
    sender: SyncSender<Envelope>,
    scheduler: Arc<dyn TimeoutScheduler>,
}

impl DispatchHandle {
    /// Queues a stimulus, blocking while the queue is full.
    ///
    /// Must not be called from the dispatch thread; use [`Self::try_submit`]
    /// or [`Self::post`] there.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchLoopError::Closed`] once the loop has stopped.
    pub fn submit(&self, stimulus: Stimulus) -> Result<(), DispatchLoopError> {
        self.sender
            .send(Envelope::Stimulus(stimulus))
            .map_err(|_| DispatchLoopError::Closed)
    }

    /// Queues a stimulus without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchLoopError::QueueFull`] when the queue is at capacity
    /// and [`DispatchLoopError::Closed`] once the loop has stopped.
    pub fn try_submit(&self, stimulus: Stimulus) -> Result<(), DispatchLoopError> {
        self.sender
            .try_send(Envelope::Stimulus(stimulus))
            .map_err(|error| match error {
                TrySendError::Full(_) => DispatchLoopError::QueueFull,
                TrySendError::Disconnected(_) => DispatchLoopError::Closed,
            })
    }

    /// Translates a host intent and queues the result.
    ///
    /// Intents that map to no stimulus are dropped and reported as `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchLoopError::Closed`] once the loop has stopped.
    pub fn deliver_intent(&self, intent: Intent) -> Result<bool, DispatchLoopError> {
        match Stimulus::from_intent(intent) {
            Some(stimulus) => self.submit(stimulus).map(|()| true),
            None => Ok(false),
        }
    }

    /// Runs `task` on the dispatch thread after the stimuli already queued.
    ///
    /// Never blocks, so it is safe to call from inside a handler.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchLoopError::QueueFull`] or
    /// [`DispatchLoopError::Closed`] when the task cannot be queued.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) -> Result<(), DispatchLoopError> {
        self.try_submit(Stimulus::Task(DispatchTask::new(task)))
    }

    /// Runs `task` on the dispatch thread once `delay` has elapsed.
    ///
    /// The returned handle cancels the task through
    /// [`Self::cancel_delayed`] if it has not been queued yet.
    pub fn post_delayed(
        &self,
        delay: Duration,
        task: impl FnOnce() + Send + 'static,
    ) -> TimerHandle {
        let sender = self.sender.clone();
        self.scheduler.schedule(
            delay,
            Box::new(move || {
                let envelope = Envelope::Stimulus(Stimulus::Task(DispatchTask::new(task)));
                if let Err(error) = sender.try_send(envelope) {
                    let reason = match error {
                        TrySendError::Full(_) => "queue full",
                        TrySendError::Disconnected(_) => "loop stopped",
                    };
                    warn!(target: LOOP_TARGET, reason, "dropping delayed task");
                }
            }),
        )
    }

    /// Cancels a delayed task that has not been queued yet.
    pub fn cancel_delayed(&self, handle: TimerHandle) {
        self.scheduler.cancel(handle);
    }
}

/// Consumer side of the dispatch queue, waiting to be started.
pub struct DispatchQueue {
    receiver: Receiver<Envelope>,
    sender: SyncSender<Envelope>,
}

impl DispatchQueue {
    /// Spawns the dispatch thread over `router`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchLoopError::Spawn`] when the thread cannot be created.
    pub fn start(self, router: DispatchRouter) -> Result<DispatchLoop, DispatchLoopError> {
        let Self { receiver, sender } = self;
        let worker = thread::Builder::new()
            .name(String::from("tether-dispatch"))
            .spawn(move || run_dispatch_loop(&receiver, &router))
            .map_err(|source| DispatchLoopError::Spawn { source })?;
        Ok(DispatchLoop {
            sender,
            worker: Some(worker),
        })
    }

    /// Dispatches every queued stimulus on the calling thread.
    ///
    /// Returns the number of stimuli handled. Used where no thread is wanted,
    /// such as deterministic tests.
    pub fn drain(&self, router: &DispatchRouter) -> usize {
        let mut handled = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(Envelope::Stimulus(stimulus)) => {
                    router.dispatch(stimulus);
                    handled += 1;
                }
                Ok(Envelope::Shutdown) => continue,
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return handled,
            }
        }
    }
}

/// Running dispatch thread.
pub struct DispatchLoop {
    sender: SyncSender<Envelope>,
    worker: Option<thread::JoinHandle<()>>,
}

impl DispatchLoop {
    /// Creates a bounded queue holding at most `capacity` stimuli.
    ///
    /// `scheduler` backs [`DispatchHandle::post_delayed`].
    #[must_use]
    pub fn channel(
        capacity: usize,
        scheduler: Arc<dyn TimeoutScheduler>,
    ) -> (DispatchHandle, DispatchQueue) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        let handle = DispatchHandle {
            sender: sender.clone(),
            scheduler,
        };
        (handle, DispatchQueue { receiver, sender })
    }

    /// Stops the loop after every stimulus queued so far has been handled.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchLoopError::ThreadPanic`] if a handler panicked.
    pub fn shutdown(mut self) -> Result<(), DispatchLoopError> {
        // A send error means the thread already exited; `join` reports why.
        let _ = self.sender.send(Envelope::Shutdown);
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| DispatchLoopError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for DispatchLoop {
    fn drop(&mut self) {
        if self.worker.is_some() {
            let _ = self.sender.try_send(Envelope::Shutdown);
        }
    }
}

fn run_dispatch_loop(receiver: &Receiver<Envelope>, router: &DispatchRouter) {
    info!(target: LOOP_TARGET, "dispatch loop started");
    let mut handled: u64 = 0;
    for envelope in receiver {
        match envelope {
            Envelope::Stimulus(stimulus) => {
                let kind = stimulus.kind();
                let outcome = router.dispatch(stimulus);
                handled += 1;
                trace!(target: LOOP_TARGET, kind, outcome = ?outcome, "stimulus handled");
            }
            Envelope::Shutdown => break,
        }
    }
    debug!(target: LOOP_TARGET, handled, "dispatch loop draining complete");
    info!(target: LOOP_TARGET, "dispatch loop stopped");
}
