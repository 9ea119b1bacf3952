//! Per-api retry state machine.
//!
//! ```text
//! Healthy --fail--> Retrying(1) --fail--> Retrying(n+1) --fail, n+1 == max--> Disabled
//!                        \__________success__________/
//!                                     |
//!                                  Healthy
//! ```
//!
//! The tracker only decides; the topic applies the side effects a transition
//! calls for (arming or disarming the retry timer, unregistering the durable
//! reminder). State is rebuilt empty on every activation.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use crate::error::TopicError;

/// Attempts (initial plus retries) tolerated before an api is disabled.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Period of the volatile retry timer.
pub const DEFAULT_RETRY_PERIOD: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive transient failures that disable an api. At least 1.
    pub max_retries: u32,
    pub retry_period: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_period: DEFAULT_RETRY_PERIOD,
        }
    }
}

impl RetryPolicy {
    /// # Errors
    ///
    /// `Configuration` if `max_retries` is zero.
    pub fn new(max_retries: u32) -> Result<Self, TopicError> {
        if max_retries == 0 {
            return Err(TopicError::Configuration("max_retries must be at least 1".into()));
        }
        Ok(Self {
            max_retries,
            ..Self::default()
        })
    }

    pub fn with_retry_period(mut self, retry_period: Duration) -> Self {
        self.retry_period = retry_period;
        self
    }
}

/// Observable state of one api within a topic activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Healthy,
    /// Consecutive transient failures so far.
    Retrying(u32),
    /// Reminder removed; no further automatic attempts.
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryRecord {
    pub failures: u32,
    pub timer_armed: bool,
}

/// What the topic has to do after a query outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTransition {
    /// Healthy -> Retrying(1). Arm the retry timer.
    StartRetrying,
    /// Retrying(n) -> Retrying(n + 1). Timer stays armed.
    StillRetrying { failures: u32 },
    /// Retrying(n) -> Healthy.
    Recovered { failures: u32, disarm_timer: bool },
    /// Budget exhausted. Disarm the timer if armed and unregister the reminder.
    Disabled { failures: u32, disarm_timer: bool },
}

#[derive(Debug, Clone, Default)]
pub struct RetryTracker {
    policy: RetryPolicy,
    records: HashMap<String, RetryRecord>,
    disabled: HashSet<String>,
}

impl RetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            records: HashMap::new(),
            disabled: HashSet::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn state(&self, api: &str) -> ProviderState {
        if self.disabled.contains(api) {
            ProviderState::Disabled
        } else if let Some(rec) = self.records.get(api) {
            ProviderState::Retrying(rec.failures)
        } else {
            ProviderState::Healthy
        }
    }

    pub fn is_retrying(&self, api: &str) -> bool {
        self.records.contains_key(api)
    }

    pub fn is_disabled(&self, api: &str) -> bool {
        self.disabled.contains(api)
    }

    pub fn record(&self, api: &str) -> Option<&RetryRecord> {
        self.records.get(api)
    }

    /// Failure counts of every retrying api.
    pub fn retrying(&self) -> BTreeMap<String, u32> {
        self.records.iter().map(|(k, v)| (k.clone(), v.failures)).collect()
    }

    pub fn disabled(&self) -> BTreeSet<String> {
        self.disabled.iter().cloned().collect()
    }

    /// A steady-state attempt of a healthy api failed transiently.
    pub fn on_initial_failure(&mut self, api: &str) -> RetryTransition {
        if self.records.contains_key(api) {
            // Only reachable if the caller skipped the retrying check
            return self.fail(api).unwrap_or(RetryTransition::StartRetrying);
        }
        if self.policy.max_retries <= 1 {
            self.disabled.insert(api.to_string());
            return RetryTransition::Disabled {
                failures: 1,
                disarm_timer: false,
            };
        }
        self.records.insert(
            api.to_string(),
            RetryRecord {
                failures: 1,
                timer_armed: false,
            },
        );
        RetryTransition::StartRetrying
    }

    pub fn mark_timer_armed(&mut self, api: &str) {
        if let Some(rec) = self.records.get_mut(api) {
            rec.timer_armed = true;
        }
    }

    /// A retry attempt succeeded. `None` if the api was not retrying.
    pub fn on_retry_success(&mut self, api: &str) -> Option<RetryTransition> {
        let rec = self.records.remove(api)?;
        Some(RetryTransition::Recovered {
            failures: rec.failures,
            disarm_timer: rec.timer_armed,
        })
    }

    /// A retry attempt failed transiently. `None` if the api was not retrying.
    pub fn on_retry_failure(&mut self, api: &str) -> Option<RetryTransition> {
        self.fail(api)
    }

    fn fail(&mut self, api: &str) -> Option<RetryTransition> {
        let rec = self.records.get_mut(api)?;
        rec.failures += 1;
        if rec.failures < self.policy.max_retries {
            return Some(RetryTransition::StillRetrying { failures: rec.failures });
        }
        let rec = self.records.remove(api)?;
        self.disabled.insert(api.to_string());
        Some(RetryTransition::Disabled {
            failures: rec.failures,
            disarm_timer: rec.timer_armed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_constants() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_period, Duration::from_secs(5));
    }

    #[test]
    fn zero_retries_is_rejected() {
        assert_eq!(
            RetryPolicy::new(0),
            Err(TopicError::Configuration("max_retries must be at least 1".into()))
        );
        assert_eq!(RetryPolicy::new(2).unwrap().max_retries, 2);
    }

    #[test]
    fn three_failures_disable() {
        let mut t = RetryTracker::new(RetryPolicy::default());
        assert_eq!(t.state("b"), ProviderState::Healthy);

        assert_eq!(t.on_initial_failure("b"), RetryTransition::StartRetrying);
        t.mark_timer_armed("b");
        assert_eq!(t.state("b"), ProviderState::Retrying(1));

        assert_eq!(
            t.on_retry_failure("b"),
            Some(RetryTransition::StillRetrying { failures: 2 })
        );
        assert_eq!(
            t.on_retry_failure("b"),
            Some(RetryTransition::Disabled {
                failures: 3,
                disarm_timer: true
            })
        );
        assert_eq!(t.state("b"), ProviderState::Disabled);
        assert!(!t.is_retrying("b"));
        assert_eq!(t.on_retry_failure("b"), None);
    }

    #[test]
    fn success_resets_the_count() {
        let mut t = RetryTracker::new(RetryPolicy::default());
        t.on_initial_failure("b");
        t.mark_timer_armed("b");
        t.on_retry_failure("b");
        assert_eq!(t.state("b"), ProviderState::Retrying(2));

        assert_eq!(
            t.on_retry_success("b"),
            Some(RetryTransition::Recovered {
                failures: 2,
                disarm_timer: true
            })
        );
        assert_eq!(t.state("b"), ProviderState::Healthy);

        assert_eq!(t.on_initial_failure("b"), RetryTransition::StartRetrying);
        assert_eq!(t.state("b"), ProviderState::Retrying(1));
    }

    #[test]
    fn single_attempt_budget_disables_immediately() {
        let mut t = RetryTracker::new(RetryPolicy::new(1).unwrap());
        assert_eq!(
            t.on_initial_failure("a"),
            RetryTransition::Disabled {
                failures: 1,
                disarm_timer: false
            }
        );
        assert_eq!(t.state("a"), ProviderState::Disabled);
        assert!(t.retrying().is_empty());
    }

    #[test]
    fn apis_are_tracked_independently() {
        let mut t = RetryTracker::new(RetryPolicy::default());
        t.on_initial_failure("a");
        t.on_initial_failure("b");
        t.on_retry_failure("b");

        let retrying = t.retrying();
        assert_eq!(retrying.get("a"), Some(&1));
        assert_eq!(retrying.get("b"), Some(&2));
        assert_eq!(t.on_retry_success("c"), None);
    }
}
