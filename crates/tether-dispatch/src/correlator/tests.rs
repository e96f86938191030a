//! Unit tests for the transaction correlator.

use std::sync::Arc;
use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::tests::support::RecordingListener;
use crate::timer::ManualTimer;

const TIMEOUT: Duration = Duration::from_secs(10);

struct Harness {
    timer: Arc<ManualTimer>,
    correlator: TransactionCorrelator,
    listener: Arc<RecordingListener>,
}

impl Harness {
    fn begin(&self) -> TransactionId {
        let mut payload = Dictionary::new();
        payload.insert_u8(0, 1);
        self.correlator
            .begin_transaction(payload, Some(self.listener.clone()))
    }
}

#[fixture]
fn harness() -> Harness {
    let timer = Arc::new(ManualTimer::new());
    let correlator = TransactionCorrelator::new(timer.clone(), TIMEOUT);
    Harness {
        timer,
        correlator,
        listener: RecordingListener::new(),
    }
}

#[rstest]
fn begin_returns_distinct_pending_ids(harness: Harness) {
    let first = harness.begin();
    let second = harness.begin();

    assert_ne!(first, second);
    assert!(harness.correlator.is_pending(first));
    assert!(harness.correlator.is_pending(second));
    assert_eq!(harness.correlator.pending_count(), 2);
    assert_eq!(harness.timer.armed(), 2);
}

#[rstest]
fn acknowledge_settles_once_and_cancels_timer(harness: Harness) {
    let id = harness.begin();

    assert_eq!(
        harness.correlator.acknowledge(id),
        Resolution::Resolved(TransactionState::Acknowledged)
    );
    assert_eq!(harness.timer.armed(), 0);
    assert!(!harness.correlator.is_pending(id));

    let completions = harness.listener.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].id, id);
    assert_eq!(completions[0].outcome(), Ok(()));
    assert_eq!(completions[0].payload.unsigned(0), Some(1));
}

#[rstest]
#[case::acknowledge(TransactionState::Acknowledged)]
#[case::reject(TransactionState::Rejected)]
#[case::expire(TransactionState::TimedOut)]
fn every_signal_after_resolution_is_stale(
    harness: Harness,
    #[case] first: TransactionState,
) {
    let id = harness.begin();
    let signal = |state: TransactionState| match state {
        TransactionState::Acknowledged => harness.correlator.acknowledge(id),
        TransactionState::Rejected => harness.correlator.reject(id),
        _ => harness.correlator.expire(id),
    };

    assert_eq!(signal(first), Resolution::Resolved(first));
    for later in [
        TransactionState::Acknowledged,
        TransactionState::Rejected,
        TransactionState::TimedOut,
    ] {
        assert_eq!(signal(later), Resolution::Stale);
    }
    assert_eq!(harness.listener.count(), 1);
    assert_eq!(harness.listener.completions()[0].state, first);
}

#[rstest]
fn reject_reports_failure_to_listener(harness: Harness) {
    let id = harness.begin();
    harness.correlator.reject(id);

    let completions = harness.listener.completions();
    assert_eq!(
        completions[0].outcome(),
        Err(TransactionFailure::Rejected { id })
    );
}

#[rstest]
fn timeout_fires_exactly_once_when_unanswered(harness: Harness) {
    let id = harness.begin();

    assert_eq!(harness.timer.advance(TIMEOUT - Duration::from_millis(1)), 0);
    assert!(harness.correlator.is_pending(id));
    assert_eq!(harness.timer.advance(Duration::from_millis(1)), 1);
    assert_eq!(harness.timer.advance(TIMEOUT), 0);

    assert!(!harness.correlator.is_pending(id));
    let completions = harness.listener.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].state, TransactionState::TimedOut);
    assert!(matches!(
        completions[0].outcome(),
        Err(TransactionFailure::TimedOut { id: failed, .. }) if failed == id
    ));
}

#[rstest]
fn timer_that_loses_the_cancellation_race_is_a_no_op(harness: Harness) {
    let id = harness.begin();
    harness.correlator.acknowledge(id);

    assert_eq!(harness.timer.fire_all_ignoring_cancellation(), 1);
    assert_eq!(harness.listener.count(), 1);
    assert_eq!(
        harness.listener.completions()[0].state,
        TransactionState::Acknowledged
    );
}

#[rstest]
fn unknown_ids_are_stale(harness: Harness) {
    let unknown = TransactionId::new(42);
    assert_eq!(harness.correlator.acknowledge(unknown), Resolution::Stale);
    assert_eq!(harness.correlator.reject(unknown), Resolution::Stale);
    assert_eq!(harness.correlator.expire(unknown), Resolution::Stale);
    assert_eq!(harness.listener.count(), 0);
}

#[rstest]
fn abandon_drops_without_notifying(harness: Harness) {
    let id = harness.begin();

    assert!(harness.correlator.abandon(id));
    assert!(!harness.correlator.abandon(id));
    assert_eq!(harness.timer.armed(), 0);
    assert_eq!(harness.correlator.acknowledge(id), Resolution::Stale);
    assert_eq!(harness.listener.count(), 0);
}

#[rstest]
fn allocation_skips_ids_still_pending(harness: Harness) {
    let first = harness.begin();
    harness.correlator.inner.lock().next_id = first.get();

    let second = harness.begin();
    assert_ne!(first, second);
}

#[rstest]
fn allocation_wraps_around_the_id_space(harness: Harness) {
    harness.correlator.inner.lock().next_id = u32::MAX;

    assert_eq!(harness.begin(), TransactionId::new(u32::MAX));
    assert_eq!(harness.begin(), TransactionId::new(0));
}

#[rstest]
fn listener_may_open_a_new_transaction(harness: Harness) {
    let correlator = harness.correlator.clone();
    let follow_up: Arc<dyn TransactionListener> =
        Arc::new(move |_completed: &CompletedTransaction| {
            correlator.begin_transaction(Dictionary::new(), None);
        });
    let id = harness
        .correlator
        .begin_transaction(Dictionary::new(), Some(follow_up));

    harness.correlator.acknowledge(id);
    assert_eq!(harness.correlator.pending_count(), 1);
}

#[rstest]
fn transactions_without_listener_still_settle(harness: Harness) {
    let id = harness
        .correlator
        .begin_transaction(Dictionary::new(), None);
    assert_eq!(
        harness.correlator.reject(id),
        Resolution::Resolved(TransactionState::Rejected)
    );
}
