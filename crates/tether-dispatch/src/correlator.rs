//! Tracking of outbound requests until the device settles them.
//!
//! Each request sent to the device opens a transaction. The transaction stays
//! pending until the first of three signals arrives: an acknowledgement, a
//! rejection or the expiry of its timeout. Whichever comes first resolves the
//! transaction; every later signal for the same id finds nothing pending and
//! is reported as [`Resolution::Stale`].
//!
//! Acknowledgements arrive on the dispatch thread while expiries arrive on the
//! timer thread, so all transitions happen under a single mutex over the
//! pending set. Listeners are notified after the mutex is released and may
//! open further transactions from inside the callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::dictionary::Dictionary;
use crate::timer::{TimeoutScheduler, TimerHandle};

pub(crate) const CORRELATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::correlator");

/// Identifier the device echoes back when it settles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(u32);

impl TransactionId {
    /// Wraps a raw transaction id.
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw transaction id.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for TransactionId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Sent and awaiting a signal from the device.
    Pending,
    /// The device confirmed the request.
    Acknowledged,
    /// The device refused the request.
    Rejected,
    /// No signal arrived before the timeout elapsed.
    TimedOut,
}

impl TransactionState {
    /// Returns `true` for every state other than [`TransactionState::Pending`].
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Acknowledged => "acknowledged",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
        };
        formatter.write_str(label)
    }
}

/// Reasons a transaction can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransactionFailure {
    /// The device answered with a negative acknowledgement.
    #[error("transaction {id} was rejected by the device")]
    Rejected {
        /// Rejected transaction.
        id: TransactionId,
    },
    /// The device did not answer in time.
    #[error("transaction {id} timed out after {}ms", waited.as_millis())]
    TimedOut {
        /// Expired transaction.
        id: TransactionId,
        /// How long the transaction was pending.
        waited: Duration,
    },
}

/// Final record handed to a [`TransactionListener`].
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTransaction {
    /// Settled transaction.
    pub id: TransactionId,
    /// Terminal state reached.
    pub state: TransactionState,
    /// Content originally sent to the device.
    pub payload: Dictionary,
    /// Time between opening and settling the transaction.
    pub elapsed: Duration,
}

impl CompletedTransaction {
    /// Collapses the terminal state into a success or failure.
    ///
    /// # Errors
    ///
    /// Returns [`TransactionFailure`] when the transaction was rejected or
    /// timed out.
    pub fn outcome(&self) -> Result<(), TransactionFailure> {
        match self.state {
            TransactionState::Rejected => Err(TransactionFailure::Rejected { id: self.id }),
            TransactionState::TimedOut => Err(TransactionFailure::TimedOut {
                id: self.id,
                waited: self.elapsed,
            }),
            TransactionState::Pending | TransactionState::Acknowledged => Ok(()),
        }
    }
}

/// Receives the outcome of a transaction exactly once.
///
/// Called on whichever thread settled the transaction: the dispatch thread for
/// acknowledgements and rejections, the timer thread for expiries.
pub trait TransactionListener: Send + Sync {
    /// Handles the settled transaction.
    fn transaction_completed(&self, completed: &CompletedTransaction);
}

impl<F> TransactionListener for F
where
    F: Fn(&CompletedTransaction) + Send + Sync,
{
    fn transaction_completed(&self, completed: &CompletedTransaction) {
        self(completed);
    }
}

/// Result of delivering a signal to the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The signal settled a pending transaction into the given state.
    Resolved(TransactionState),
    /// No transaction with that id was pending; the signal was ignored.
    Stale,
}

struct Transaction {
    created_at: Instant,
    payload: Dictionary,
    listener: Option<Arc<dyn TransactionListener>>,
    timer: Option<TimerHandle>,
}

#[derive(Default)]
struct PendingSet {
    next_id: u32,
    transactions: HashMap<TransactionId, Transaction>,
}

impl PendingSet {
    fn allocate(&mut self) -> TransactionId {
        loop {
            let candidate = TransactionId(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
            if !self.transactions.contains_key(&candidate) {
                return candidate;
            }
        }
    }
}

struct CorrelatorInner {
    pending: Mutex<PendingSet>,
    scheduler: Arc<dyn TimeoutScheduler>,
    timeout: Duration,
}

impl CorrelatorInner {
    fn lock(&self) -> MutexGuard<'_, PendingSet> {
        self.pending
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn settle(&self, id: TransactionId, state: TransactionState) -> Resolution {
        let Some(transaction) = self.lock().transactions.remove(&id) else {
            debug!(
                target: CORRELATOR_TARGET,
                transaction = %id,
                signal = %state,
                "ignoring signal for transaction that is not pending"
            );
            return Resolution::Stale;
        };

        // A timer that already started firing runs anyway; `settle` sees the
        // entry gone and treats it as stale.
        if let Some(timer) = transaction.timer {
            self.scheduler.cancel(timer);
        }

        let elapsed = transaction.created_at.elapsed();
        if state == TransactionState::TimedOut {
            warn!(
                target: CORRELATOR_TARGET,
                transaction = %id,
                elapsed_ms = elapsed.as_millis(),
                "transaction timed out"
            );
        } else {
            debug!(
                target: CORRELATOR_TARGET,
                transaction = %id,
                state = %state,
                elapsed_ms = elapsed.as_millis(),
                "transaction settled"
            );
        }

        if let Some(listener) = transaction.listener {
            listener.transaction_completed(&CompletedTransaction {
                id,
                state,
                payload: transaction.payload,
                elapsed,
            });
        }
        Resolution::Resolved(state)
    }
}

/// Issues transaction ids and settles them exactly once.
#[derive(Clone)]
pub struct TransactionCorrelator {
    inner: Arc<CorrelatorInner>,
}

impl TransactionCorrelator {
    /// Creates a correlator that expires transactions after `timeout`.
    #[must_use]
    pub fn new(scheduler: Arc<dyn TimeoutScheduler>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CorrelatorInner {
                pending: Mutex::new(PendingSet::default()),
                scheduler,
                timeout,
            }),
        }
    }

    /// Window after which an unanswered transaction expires.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Opens a pending transaction for `payload` and arms its timeout.
    ///
    /// The returned id is not shared with any other pending transaction.
    pub fn begin_transaction(
        &self,
        payload: Dictionary,
        listener: Option<Arc<dyn TransactionListener>>,
    ) -> TransactionId {
        let mut pending = self.inner.lock();
        let id = pending.allocate();
        let weak: Weak<CorrelatorInner> = Arc::downgrade(&self.inner);
        let timer = self.inner.scheduler.schedule(
            self.inner.timeout,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.settle(id, TransactionState::TimedOut);
                }
            }),
        );
        pending.transactions.insert(
            id,
            Transaction {
                created_at: Instant::now(),
                payload,
                listener,
                timer: Some(timer),
            },
        );
        drop(pending);
        debug!(
            target: CORRELATOR_TARGET,
            transaction = %id,
            timeout_ms = self.inner.timeout.as_millis(),
            "transaction opened"
        );
        id
    }

    /// Settles `id` as acknowledged if it is still pending.
    pub fn acknowledge(&self, id: TransactionId) -> Resolution {
        self.inner.settle(id, TransactionState::Acknowledged)
    }

    /// Settles `id` as rejected if it is still pending.
    pub fn reject(&self, id: TransactionId) -> Resolution {
        self.inner.settle(id, TransactionState::Rejected)
    }

    /// Settles `id` as timed out if it is still pending.
    ///
    /// Normally invoked by the armed timeout rather than by callers.
    pub fn expire(&self, id: TransactionId) -> Resolution {
        self.inner.settle(id, TransactionState::TimedOut)
    }

    /// Drops a pending transaction without notifying its listener.
    ///
    /// Returns `false` when `id` was not pending.
    pub fn abandon(&self, id: TransactionId) -> bool {
        let Some(transaction) = self.inner.lock().transactions.remove(&id) else {
            return false;
        };
        if let Some(timer) = transaction.timer {
            self.inner.scheduler.cancel(timer);
        }
        debug!(target: CORRELATOR_TARGET, transaction = %id, "transaction abandoned");
        true
    }

    /// Number of transactions still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().transactions.len()
    }

    /// Returns `true` while `id` is pending.
    #[must_use]
    pub fn is_pending(&self, id: TransactionId) -> bool {
        self.inner.lock().transactions.contains_key(&id)
    }
}

impl fmt::Debug for TransactionCorrelator {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TransactionCorrelator")
            .field("pending", &self.pending_count())
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
