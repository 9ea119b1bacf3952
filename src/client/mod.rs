use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::TopicError;
use crate::runtime::Runtime;
use crate::store::ReminderRow;
use crate::topic::{TopicMessage, TopicSchedule, TopicSnapshot};

/// Error type returned by the `wait_for_*` helpers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("timed out waiting for topic")]
    Timeout,
    #[error(transparent)]
    Topic(#[from] TopicError),
}

/// Thin client for control-plane operations on topics.
///
/// Commands go through the runtime's mailboxes; reads of durable state go
/// straight to the store and never activate a topic.
#[derive(Clone)]
pub struct Client {
    runtime: Arc<Runtime>,
}

impl Client {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    /// Create a topic: persist its query and arm one durable reminder per api.
    ///
    /// # Errors
    ///
    /// `InvalidSetup` for a bad schedule, `AlreadyCreated` if the topic
    /// exists, `Persistence` if the store rejects the setup.
    pub async fn create_topic(
        &self,
        topic_id: &str,
        query: impl Into<String>,
        schedule: TopicSchedule,
    ) -> Result<(), TopicError> {
        // Fail fast without activating the topic
        schedule.validate()?;
        self.runtime
            .ask(
                topic_id,
                TopicMessage::Create {
                    query: query.into(),
                    schedule,
                },
            )
            .await
    }

    /// Last persisted total of a topic.
    ///
    /// # Errors
    ///
    /// `Persistence` if the store cannot be read.
    pub async fn total(&self, topic_id: &str) -> Result<i64, TopicError> {
        Ok(self.runtime.store().read_total(topic_id).await?)
    }

    /// Durable reminders still registered for a topic.
    ///
    /// # Errors
    ///
    /// `Persistence` if the store cannot be read.
    pub async fn reminders(&self, topic_id: &str) -> Result<Vec<ReminderRow>, TopicError> {
        Ok(self.runtime.store().list_reminders(topic_id).await?)
    }

    /// In-memory state of the topic's current activation.
    ///
    /// # Errors
    ///
    /// See [`Runtime::snapshot`].
    pub async fn snapshot(&self, topic_id: &str) -> Result<TopicSnapshot, TopicError> {
        self.runtime.snapshot(topic_id).await
    }

    /// Deactivate a topic. Returns `false` if it was not active.
    pub async fn deactivate(&self, topic_id: &str) -> bool {
        self.runtime.deactivate(topic_id).await
    }

    /// Poll the persisted total until it reaches `at_least`.
    ///
    /// # Errors
    ///
    /// `Timeout` if the total is still lower after `timeout`.
    pub async fn wait_for_total(&self, topic_id: &str, at_least: i64, timeout: Duration) -> Result<i64, WaitError> {
        let deadline = Instant::now() + timeout;
        loop {
            let total = self.total(topic_id).await?;
            if total >= at_least {
                return Ok(total);
            }
            if Instant::now() >= deadline {
                return Err(WaitError::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Poll until the reminder for `api` is gone.
    ///
    /// # Errors
    ///
    /// `Timeout` if the reminder still exists after `timeout`.
    pub async fn wait_for_reminder_removed(&self, topic_id: &str, api: &str, timeout: Duration) -> Result<(), WaitError> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.reminders(topic_id).await?.iter().any(|r| r.name == api) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(WaitError::Timeout);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}
