//! Property-based tests for the retry state machine and reminder cadence.

use durotopic::scheduling::reminders::next_fire_after;
use durotopic::store::ReminderRow;
use durotopic::topic::{ProviderState, RetryPolicy, RetryTracker, RetryTransition};
use proptest::prelude::*;

/// Feed a sequence of attempt outcomes (true = success) for one api through
/// the tracker the same way a topic does: the first failure enters retrying,
/// later outcomes arrive via the retry timer.
fn drive(tracker: &mut RetryTracker, outcomes: &[bool]) -> (u32, Vec<RetryTransition>) {
    let mut attempts = 0;
    let mut transitions = Vec::new();
    for &ok in outcomes {
        if tracker.is_disabled("b") {
            break;
        }
        attempts += 1;
        let t = match (tracker.is_retrying("b"), ok) {
            (false, true) => None,
            (false, false) => Some(tracker.on_initial_failure("b")),
            (true, true) => tracker.on_retry_success("b"),
            (true, false) => tracker.on_retry_failure("b"),
        };
        if t == Some(RetryTransition::StartRetrying) {
            tracker.mark_timer_armed("b");
        }
        transitions.extend(t);
    }
    (attempts, transitions)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// The retry count never reaches the budget without disabling the api.
    #[test]
    fn prop_failures_stay_below_budget(
        max_retries in 1u32..6,
        outcomes in prop::collection::vec(any::<bool>(), 0..40),
    ) {
        for prefix in 0..=outcomes.len() {
            let mut tracker = RetryTracker::new(RetryPolicy::new(max_retries).unwrap());
            drive(&mut tracker, &outcomes[..prefix]);
            if let ProviderState::Retrying(n) = tracker.state("b") {
                prop_assert!(n >= 1 && n < max_retries);
            }
        }
    }

    /// Disabled exactly when `max_retries` consecutive failures occurred, and
    /// no attempt is made afterwards.
    #[test]
    fn prop_disabled_iff_budget_exhausted(
        max_retries in 1u32..6,
        outcomes in prop::collection::vec(any::<bool>(), 0..40),
    ) {
        let mut tracker = RetryTracker::new(RetryPolicy::new(max_retries).unwrap());
        let (attempts, transitions) = drive(&mut tracker, &outcomes);

        let mut run = 0u32;
        let mut expected_disabled_at = None;
        for (i, &ok) in outcomes.iter().enumerate() {
            run = if ok { 0 } else { run + 1 };
            if run == max_retries {
                expected_disabled_at = Some(i as u32 + 1);
                break;
            }
        }

        match expected_disabled_at {
            Some(at) => {
                prop_assert_eq!(tracker.state("b"), ProviderState::Disabled);
                prop_assert_eq!(attempts, at);
                let last = transitions.last().copied();
                let disabled_with = matches!(last, Some(RetryTransition::Disabled { failures, .. }) if failures == max_retries);
                prop_assert!(disabled_with);
            }
            None => {
                prop_assert!(!tracker.is_disabled("b"));
                prop_assert_eq!(attempts as usize, outcomes.len());
            }
        }
    }

    /// An overdue reminder fires once and is pushed into the future.
    #[test]
    fn prop_next_fire_is_in_the_future(
        period_ms in 1u64..100_000,
        next_fire_at_ms in 0u64..1_000_000,
        lag in 0u64..1_000_000,
    ) {
        let row = ReminderRow {
            topic_id: "t".into(),
            name: "a".into(),
            payload: "a".into(),
            period_ms,
            next_fire_at_ms,
        };
        let now = next_fire_at_ms + lag;
        let next = next_fire_after(&row, now);
        prop_assert!(next > now);
        prop_assert!(next <= now + period_ms);
        if lag < period_ms {
            prop_assert_eq!(next, next_fire_at_ms + period_ms);
        }
    }
}
