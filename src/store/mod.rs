use serde::{Deserialize, Serialize};

pub mod error;
/// In-memory store for tests and single-process use.
pub mod in_memory;
/// SQLite-backed store.
pub mod sqlite;

pub use error::StoreError;

/// A persisted durable reminder registration.
///
/// Rows are keyed by `(topic_id, name)`; re-registering the same name
/// overwrites the row rather than adding a second one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderRow {
    pub topic_id: String,
    pub name: String,
    /// Delivered to the topic on every firing.
    pub payload: String,
    pub period_ms: u64,
    /// Wall-clock time (ms since epoch) of the next firing.
    pub next_fire_at_ms: u64,
}

/// Durable storage contract used by topic workers and the reminder dispatcher.
///
/// Everything a topic needs to recover after a crash lives here: its query,
/// its running total and its durable reminder rows. Volatile retry state is
/// deliberately absent.
#[async_trait::async_trait]
pub trait TopicStore: Send + Sync {
    /// Read the persisted total for a topic. Returns `0` when never written.
    async fn read_total(&self, topic_id: &str) -> Result<i64, StoreError>;

    /// Overwrite the persisted total for a topic.
    async fn write_total(&self, topic_id: &str, total: i64) -> Result<(), StoreError>;

    /// Read the query a topic was created with, if any.
    async fn read_query(&self, topic_id: &str) -> Result<Option<String>, StoreError>;

    /// Persist the query for a topic. Does not touch the total.
    async fn write_query(&self, topic_id: &str, query: &str) -> Result<(), StoreError>;

    /// Insert or replace a reminder row keyed by `(topic_id, name)`.
    async fn upsert_reminder(&self, reminder: ReminderRow) -> Result<(), StoreError>;

    /// Delete a reminder row. Returns `false` when no row existed.
    async fn delete_reminder(&self, topic_id: &str, name: &str) -> Result<bool, StoreError>;

    /// All reminder rows of one topic, ordered by name.
    async fn list_reminders(&self, topic_id: &str) -> Result<Vec<ReminderRow>, StoreError>;

    /// Up to `limit` rows with `next_fire_at_ms <= now_ms`, earliest first.
    async fn fetch_due_reminders(&self, now_ms: u64, limit: usize) -> Result<Vec<ReminderRow>, StoreError>;

    /// Move a reminder's next firing from `expected_fire_at_ms` to `next_fire_at_ms`.
    ///
    /// Returns `false` if the row was deleted or re-registered in the meantime,
    /// in which case the caller must not deliver the firing.
    async fn advance_reminder(
        &self,
        topic_id: &str,
        name: &str,
        expected_fire_at_ms: u64,
        next_fire_at_ms: u64,
    ) -> Result<bool, StoreError>;
}
