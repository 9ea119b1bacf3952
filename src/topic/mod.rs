//! The topic worker.
//!
//! A topic fans one query out to a set of apis, each polled by its own
//! durable reminder, and keeps the sum of every successful result in the
//! store. Transient api failures move the api through the [`retry`] state
//! machine, polled by a volatile timer instead of the reminder.
//!
//! A [`Topic`] is one activation: it is built by [`Topic::activate`] from
//! durable state alone and processes [`TopicMessage`]s strictly one at a time.
//! Serialization is the caller's job; the runtime gives each topic a single
//! mailbox task.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::{ApiError, ApiRegistry};
use crate::error::TopicError;
use crate::runtime::observability::TopicMetrics;
use crate::scheduling::{ReminderService, TimerService};
use crate::store::TopicStore;

pub mod retry;

pub use retry::{ProviderState, RetryPolicy, RetryRecord, RetryTracker, RetryTransition};

/// Retry knobs for topics.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TopicOptions {
    /// Attempts before an api is disabled. Default: 3
    pub max_retries: u32,
    /// Period of the volatile retry timer in milliseconds. Default: 5000
    pub retry_period_ms: u64,
}

impl Default for TopicOptions {
    fn default() -> Self {
        Self {
            max_retries: retry::DEFAULT_MAX_RETRIES,
            retry_period_ms: retry::DEFAULT_RETRY_PERIOD.as_millis() as u64,
        }
    }
}

impl TopicOptions {
    /// # Errors
    ///
    /// Rejects a zero retry budget or a zero retry period.
    pub fn validate(&self) -> Result<(), TopicError> {
        if self.max_retries == 0 {
            return Err(TopicError::Configuration("max_retries must be at least 1".into()));
        }
        if self.retry_period_ms == 0 {
            return Err(TopicError::Configuration("retry_period_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.max(1),
            retry_period: Duration::from_millis(self.retry_period_ms),
        }
    }
}

/// Api name -> reminder period, supplied once at creation.
///
/// Kept as an ordered list so that a reused name can be reported instead of
/// silently collapsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSchedule {
    entries: Vec<(String, Duration)>,
}

impl TopicSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Poll `api` every `period`.
    pub fn every(mut self, api: impl Into<String>, period: Duration) -> Self {
        self.entries.push((api.into(), period));
        self
    }

    pub fn entries(&self) -> &[(String, Duration)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// # Errors
    ///
    /// `InvalidSetup` for an empty schedule, an empty api name, a zero period
    /// or an api name used twice.
    pub fn validate(&self) -> Result<(), TopicError> {
        if self.entries.is_empty() {
            return Err(TopicError::InvalidSetup("schedule has no apis".into()));
        }
        let mut seen = HashSet::new();
        for (api, period) in &self.entries {
            if api.is_empty() {
                return Err(TopicError::InvalidSetup("api name must not be empty".into()));
            }
            if period.is_zero() {
                return Err(TopicError::InvalidSetup(format!("api {api} has a zero period")));
            }
            if !seen.insert(api.as_str()) {
                return Err(TopicError::InvalidSetup(format!("api {api} is scheduled twice")));
            }
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<(S, Duration)> for TopicSchedule {
    fn from_iter<I: IntoIterator<Item = (S, Duration)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Everything a topic can be asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicMessage {
    /// One-shot setup: store the query and arm one reminder per api.
    Create { query: String, schedule: TopicSchedule },
    /// A durable reminder for `api` fired.
    Reminder { api: String },
    /// The volatile retry timer for `api` fired.
    RetryTimer { api: String },
}

impl TopicMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            TopicMessage::Create { .. } => "Create",
            TopicMessage::Reminder { .. } => "Reminder",
            TopicMessage::RetryTimer { .. } => "RetryTimer",
        }
    }
}

/// In-memory view of one activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSnapshot {
    pub topic_id: String,
    pub query: Option<String>,
    pub total: i64,
    /// api -> consecutive failures
    pub retrying: BTreeMap<String, u32>,
    pub disabled: Vec<String>,
}

/// Result of a single query attempt that did not fail fatally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Succeeded { count: i64, total: i64 },
    Unavailable { message: String },
}

/// Collaborators shared by every activation of a runtime.
#[derive(Clone)]
pub struct TopicServices {
    pub store: Arc<dyn TopicStore>,
    pub apis: ApiRegistry,
    pub reminders: Arc<dyn ReminderService>,
    pub metrics: Arc<TopicMetrics>,
    pub policy: RetryPolicy,
}

/// One activation of a topic worker.
pub struct Topic {
    id: String,
    query: Option<String>,
    total: i64,
    retries: RetryTracker,
    services: TopicServices,
    timers: Box<dyn TimerService>,
}

impl Topic {
    /// Recover a topic from durable state.
    ///
    /// Reads the total and query from the store. Retry state starts empty and
    /// no volatile timer is re-armed: an api that was mid-retry when the
    /// previous activation ended is healthy again and waits for its next
    /// reminder.
    ///
    /// # Errors
    ///
    /// `Persistence` if the store cannot be read.
    pub async fn activate(
        id: impl Into<String>,
        services: TopicServices,
        timers: Box<dyn TimerService>,
    ) -> Result<Self, TopicError> {
        let id = id.into();
        let total = services.store.read_total(&id).await?;
        let query = services.store.read_query(&id).await?;
        services.metrics.record_activation();
        info!(target: "durotopic::topic", topic_id = %id, total, created = query.is_some(), "Topic activated");
        let retries = RetryTracker::new(services.policy.clone());
        Ok(Self {
            id,
            query,
            total,
            retries,
            services,
            timers,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn provider_state(&self, api: &str) -> ProviderState {
        self.retries.state(api)
    }

    pub fn retry_record(&self, api: &str) -> Option<&RetryRecord> {
        self.retries.record(api)
    }

    pub fn snapshot(&self) -> TopicSnapshot {
        TopicSnapshot {
            topic_id: self.id.clone(),
            query: self.query.clone(),
            total: self.total,
            retrying: self.retries.retrying(),
            disabled: self.retries.disabled().into_iter().collect(),
        }
    }

    /// Single dispatch point for every message.
    ///
    /// # Errors
    ///
    /// Everything except a transient api failure: setup errors, unknown or
    /// failing apis and store failures.
    pub async fn handle(&mut self, message: TopicMessage) -> Result<(), TopicError> {
        match message {
            TopicMessage::Create { query, schedule } => self.create(query, schedule).await,
            TopicMessage::Reminder { api } => self.on_reminder(&api).await,
            TopicMessage::RetryTimer { api } => self.on_retry_timer(&api).await,
        }
    }

    /// Drop all volatile state. Durable reminders are left alone.
    pub fn deactivate(&mut self) {
        self.timers.clear();
        self.services.metrics.record_deactivation();
        info!(
            target: "durotopic::topic",
            topic_id = %self.id,
            total = self.total,
            dropped_retries = self.retries.retrying().len(),
            "Topic deactivated"
        );
    }

    async fn create(&mut self, query: String, schedule: TopicSchedule) -> Result<(), TopicError> {
        schedule.validate()?;
        if self.query.is_some() {
            return Err(TopicError::AlreadyCreated(self.id.clone()));
        }

        // Reminders first: registration is idempotent, so a failed create can
        // be repeated. The persisted query marks the topic as created.
        for (api, period) in schedule.entries() {
            self.services
                .reminders
                .register(&self.id, api, Duration::ZERO, *period, api)
                .await?;
        }
        self.services.store.write_query(&self.id, &query).await?;

        info!(
            target: "durotopic::topic",
            topic_id = %self.id,
            query = %query,
            apis = schedule.len(),
            "Topic created"
        );
        self.query = Some(query);
        Ok(())
    }

    async fn on_reminder(&mut self, api: &str) -> Result<(), TopicError> {
        if self.retries.is_disabled(api) {
            // Still firing: an earlier unregister did not go through
            debug!(target: "durotopic::topic", topic_id = %self.id, api, "Reminder for disabled api, unregistering again");
            self.services.reminders.unregister(&self.id, api).await?;
            return Ok(());
        }
        if self.retries.is_retrying(api) {
            // The retry timer owns this api until it recovers or is disabled
            debug!(target: "durotopic::topic", topic_id = %self.id, api, "Api is retrying, reminder skipped");
            return Ok(());
        }

        match self.attempt_query(api).await? {
            QueryOutcome::Succeeded { .. } => Ok(()),
            QueryOutcome::Unavailable { message } => {
                warn!(
                    target: "durotopic::topic",
                    topic_id = %self.id,
                    api,
                    error = %message,
                    "Api unavailable, scheduling retries"
                );
                let transition = self.retries.on_initial_failure(api);
                self.apply(api, transition).await
            }
        }
    }

    async fn on_retry_timer(&mut self, api: &str) -> Result<(), TopicError> {
        if !self.retries.is_retrying(api) {
            debug!(target: "durotopic::topic", topic_id = %self.id, api, "Stale retry timer ignored");
            return Ok(());
        }

        let outcome = match self.attempt_query(api).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The record stays; try again one retry period from now
                self.arm_retry_timer(api);
                return Err(e);
            }
        };
        let transition = match outcome {
            QueryOutcome::Succeeded { .. } => self.retries.on_retry_success(api),
            QueryOutcome::Unavailable { .. } => self.retries.on_retry_failure(api),
        };
        match transition {
            Some(t) => self.apply(api, t).await,
            None => Ok(()),
        }
    }

    /// Retry timers are one-shot and re-armed after every attempt, so
    /// consecutive attempts are always a full retry period apart.
    fn arm_retry_timer(&mut self, api: &str) {
        let period = self.retries.policy().retry_period;
        self.timers.register(api, period, Duration::ZERO, api);
        self.retries.mark_timer_armed(api);
    }

    async fn apply(&mut self, api: &str, transition: RetryTransition) -> Result<(), TopicError> {
        match transition {
            RetryTransition::StartRetrying => {
                self.arm_retry_timer(api);
                self.services.metrics.record_retry_started();
            }
            RetryTransition::StillRetrying { failures } => {
                warn!(
                    target: "durotopic::topic",
                    topic_id = %self.id,
                    api,
                    failures,
                    "Failed to obtain results from api"
                );
                self.arm_retry_timer(api);
            }
            RetryTransition::Recovered { failures, disarm_timer } => {
                if disarm_timer {
                    self.timers.unregister(api);
                }
                self.services.metrics.record_api_recovered();
                info!(target: "durotopic::topic", topic_id = %self.id, api, failures, "Api recovered");
            }
            RetryTransition::Disabled { failures, disarm_timer } => {
                if disarm_timer {
                    self.timers.unregister(api);
                }
                self.services.metrics.record_api_disabled();
                warn!(
                    target: "durotopic::topic",
                    topic_id = %self.id,
                    api,
                    failures,
                    "Retry budget exhausted, disabling api"
                );
                self.services.reminders.unregister(&self.id, api).await?;
            }
        }
        Ok(())
    }

    /// Query one api and fold a successful count into the persisted total.
    ///
    /// The in-memory total only moves once the store accepted the new value.
    ///
    /// # Errors
    ///
    /// `NotCreated`, `UnknownApi`, `ApiFailed`, `TotalOverflow` or
    /// `Persistence`. A transient failure is an `Ok(QueryOutcome::Unavailable)`.
    pub async fn attempt_query(&mut self, api: &str) -> Result<QueryOutcome, TopicError> {
        let metrics = &self.services.metrics;
        let Some(query) = self.query.clone() else {
            return Err(TopicError::NotCreated(self.id.clone()));
        };
        let Some(endpoint) = self.services.apis.resolve(api) else {
            metrics.record_query_failed();
            return Err(TopicError::UnknownApi { api: api.to_string() });
        };

        match endpoint.query(query).await {
            Ok(count) => {
                let Some(total) = self.total.checked_add(count) else {
                    metrics.record_query_failed();
                    return Err(TopicError::TotalOverflow {
                        api: api.to_string(),
                        count,
                    });
                };
                if let Err(e) = self.services.store.write_total(&self.id, total).await {
                    metrics.record_persistence_failure();
                    return Err(e.into());
                }
                self.total = total;
                metrics.record_query_succeeded();
                debug!(
                    target: "durotopic::topic",
                    topic_id = %self.id,
                    api,
                    count,
                    total,
                    "Successfully obtained results from api"
                );
                Ok(QueryOutcome::Succeeded { count, total })
            }
            Err(ApiError::Unavailable(message)) => {
                metrics.record_query_unavailable();
                Ok(QueryOutcome::Unavailable { message })
            }
            Err(ApiError::Failed(message)) => {
                metrics.record_query_failed();
                Err(TopicError::ApiFailed {
                    api: api.to_string(),
                    message,
                })
            }
        }
    }
}
