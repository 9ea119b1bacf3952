use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{ReminderService, duration_ms, now_ms};
use crate::store::{ReminderRow, StoreError, TopicStore};

/// [`ReminderService`] that persists registrations as store rows.
pub struct StoreReminders {
    store: Arc<dyn TopicStore>,
}

impl StoreReminders {
    pub fn new(store: Arc<dyn TopicStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReminderService for StoreReminders {
    async fn register(
        &self,
        topic_id: &str,
        name: &str,
        initial_delay: Duration,
        period: Duration,
        payload: &str,
    ) -> Result<(), StoreError> {
        let row = ReminderRow {
            topic_id: topic_id.to_string(),
            name: name.to_string(),
            payload: payload.to_string(),
            period_ms: duration_ms(period).max(1),
            next_fire_at_ms: now_ms().saturating_add(duration_ms(initial_delay)),
        };
        debug!(
            target: "durotopic::reminders",
            topic_id,
            name,
            period_ms = row.period_ms,
            next_fire_at_ms = row.next_fire_at_ms,
            "Registering reminder"
        );
        self.store.upsert_reminder(row).await
    }

    async fn unregister(&self, topic_id: &str, name: &str) -> Result<(), StoreError> {
        let existed = self.store.delete_reminder(topic_id, name).await?;
        debug!(target: "durotopic::reminders", topic_id, name, existed, "Unregistered reminder");
        Ok(())
    }
}

/// Receiver of due reminder firings.
pub trait ReminderSink: Send + Sync {
    /// Deliver one firing. Returns `false` if the receiver is gone.
    fn deliver(&self, reminder: &ReminderRow) -> bool;
}

/// Next fire time after a firing observed at `now_ms`.
///
/// Keeps the original cadence when on time. Missed periods are coalesced: an
/// overdue reminder fires once and the next firing is one period from now.
pub fn next_fire_after(reminder: &ReminderRow, now_ms: u64) -> u64 {
    let period = reminder.period_ms.max(1);
    let scheduled = reminder.next_fire_at_ms.saturating_add(period);
    if scheduled > now_ms {
        scheduled
    } else {
        now_ms.saturating_add(period)
    }
}

/// Background poller that turns due reminder rows into deliveries.
///
/// Each due row is first advanced in the store with a compare-and-set on its
/// previous fire time and only delivered if that succeeds, so a reminder that
/// was unregistered or re-registered after being fetched is never delivered.
pub struct ReminderDispatcher {
    store: Arc<dyn TopicStore>,
    sink: Arc<dyn ReminderSink>,
    poll_interval: Duration,
    batch_size: usize,
}

impl ReminderDispatcher {
    pub fn new(
        store: Arc<dyn TopicStore>,
        sink: Arc<dyn ReminderSink>,
        poll_interval: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            sink,
            poll_interval,
            batch_size: batch_size.max(1),
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        loop {
            let advanced = self.poll_once().await;
            // A full batch means more rows may be due right now
            if advanced < self.batch_size {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }

    /// Fetch and deliver one batch of due reminders. Returns how many rows
    /// were advanced.
    pub async fn poll_once(&self) -> usize {
        let now = now_ms();
        let due = match self.store.fetch_due_reminders(now, self.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                warn!(target: "durotopic::reminders", error = %e, "Failed to fetch due reminders");
                return 0;
            }
        };

        let mut advanced = 0;
        for row in due {
            let next = next_fire_after(&row, now);
            match self
                .store
                .advance_reminder(&row.topic_id, &row.name, row.next_fire_at_ms, next)
                .await
            {
                Ok(true) => {
                    advanced += 1;
                    if !self.sink.deliver(&row) {
                        debug!(
                            target: "durotopic::reminders",
                            topic_id = %row.topic_id,
                            name = %row.name,
                            "Reminder sink rejected firing"
                        );
                    }
                }
                Ok(false) => {
                    debug!(
                        target: "durotopic::reminders",
                        topic_id = %row.topic_id,
                        name = %row.name,
                        "Reminder changed since fetch, skipping"
                    );
                }
                Err(e) => {
                    warn!(
                        target: "durotopic::reminders",
                        topic_id = %row.topic_id,
                        name = %row.name,
                        error = %e,
                        "Failed to advance reminder"
                    );
                }
            }
        }
        advanced
    }
}
