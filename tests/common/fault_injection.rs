//! Fault-injecting store for testing persistence error handling.

#![allow(dead_code)]

use async_trait::async_trait;
use durotopic::store::in_memory::InMemoryStore;
use durotopic::store::{ReminderRow, StoreError, TopicStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Wraps an [`InMemoryStore`] and fails selected operations on demand.
pub struct FailingStore {
    inner: Arc<InMemoryStore>,
    fail_write_total: AtomicBool,
    fail_write_query: AtomicBool,
    fail_reads: AtomicBool,
    fail_reminders: AtomicBool,
    /// Number of rejected writes so far
    rejected: AtomicU32,
}

impl FailingStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            fail_write_total: AtomicBool::new(false),
            fail_write_query: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_reminders: AtomicBool::new(false),
            rejected: AtomicU32::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<InMemoryStore> {
        &self.inner
    }

    pub fn fail_write_total(&self, fail: bool) {
        self.fail_write_total.store(fail, Ordering::SeqCst);
    }

    pub fn fail_write_query(&self, fail: bool) {
        self.fail_write_query.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Fail reminder registration and removal.
    pub fn fail_reminders(&self, fail: bool) {
        self.fail_reminders.store(fail, Ordering::SeqCst);
    }

    pub fn rejected(&self) -> u32 {
        self.rejected.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool, operation: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::retryable(operation, "injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl TopicStore for FailingStore {
    async fn read_total(&self, topic_id: &str) -> Result<i64, StoreError> {
        self.check(&self.fail_reads, "read_total")?;
        self.inner.read_total(topic_id).await
    }

    async fn write_total(&self, topic_id: &str, total: i64) -> Result<(), StoreError> {
        self.check(&self.fail_write_total, "write_total")?;
        self.inner.write_total(topic_id, total).await
    }

    async fn read_query(&self, topic_id: &str) -> Result<Option<String>, StoreError> {
        self.check(&self.fail_reads, "read_query")?;
        self.inner.read_query(topic_id).await
    }

    async fn write_query(&self, topic_id: &str, query: &str) -> Result<(), StoreError> {
        self.check(&self.fail_write_query, "write_query")?;
        self.inner.write_query(topic_id, query).await
    }

    async fn upsert_reminder(&self, reminder: ReminderRow) -> Result<(), StoreError> {
        self.check(&self.fail_reminders, "upsert_reminder")?;
        self.inner.upsert_reminder(reminder).await
    }

    async fn delete_reminder(&self, topic_id: &str, name: &str) -> Result<bool, StoreError> {
        self.check(&self.fail_reminders, "delete_reminder")?;
        self.inner.delete_reminder(topic_id, name).await
    }

    async fn list_reminders(&self, topic_id: &str) -> Result<Vec<ReminderRow>, StoreError> {
        self.inner.list_reminders(topic_id).await
    }

    async fn fetch_due_reminders(&self, now_ms: u64, limit: usize) -> Result<Vec<ReminderRow>, StoreError> {
        self.inner.fetch_due_reminders(now_ms, limit).await
    }

    async fn advance_reminder(
        &self,
        topic_id: &str,
        name: &str,
        expected_fire_at_ms: u64,
        next_fire_at_ms: u64,
    ) -> Result<bool, StoreError> {
        self.inner
            .advance_reminder(topic_id, name, expected_fire_at_ms, next_fire_at_ms)
            .await
    }
}
