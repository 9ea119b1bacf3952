use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;

use super::{ReminderRow, StoreError, TopicStore};

#[derive(Debug, Default, Clone)]
struct TopicRow {
    query: Option<String>,
    total: i64,
}

/// Volatile implementation of [`TopicStore`].
///
/// "Durable" only for the lifetime of the value: share one instance between
/// two runtimes to simulate a process restart.
#[derive(Default)]
pub struct InMemoryStore {
    topics: Mutex<HashMap<String, TopicRow>>,
    // (topic_id, name) -> row
    reminders: Mutex<BTreeMap<(String, String), ReminderRow>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data (test utility).
    pub async fn reset(&self) {
        self.topics.lock().await.clear();
        self.reminders.lock().await.clear();
    }

    /// Pretty-printed dump of every topic and reminder (test utility).
    pub async fn dump_all_pretty(&self) -> String {
        let topics = self.topics.lock().await;
        let reminders = self.reminders.lock().await;
        let mut ids: Vec<&String> = topics.keys().collect();
        ids.sort();
        let mut out = String::new();
        for id in ids {
            let row = &topics[id];
            out.push_str(&format!("topic={id} query={:?} total={}\n", row.query, row.total));
            for r in reminders.values().filter(|r| &r.topic_id == id) {
                out.push_str(&format!("  reminder {} every {}ms next={}\n", r.name, r.period_ms, r.next_fire_at_ms));
            }
        }
        out
    }
}

#[async_trait::async_trait]
impl TopicStore for InMemoryStore {
    async fn read_total(&self, topic_id: &str) -> Result<i64, StoreError> {
        Ok(self.topics.lock().await.get(topic_id).map(|r| r.total).unwrap_or(0))
    }

    async fn write_total(&self, topic_id: &str, total: i64) -> Result<(), StoreError> {
        self.topics.lock().await.entry(topic_id.to_string()).or_default().total = total;
        Ok(())
    }

    async fn read_query(&self, topic_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.topics.lock().await.get(topic_id).and_then(|r| r.query.clone()))
    }

    async fn write_query(&self, topic_id: &str, query: &str) -> Result<(), StoreError> {
        self.topics.lock().await.entry(topic_id.to_string()).or_default().query = Some(query.to_string());
        Ok(())
    }

    async fn upsert_reminder(&self, reminder: ReminderRow) -> Result<(), StoreError> {
        let key = (reminder.topic_id.clone(), reminder.name.clone());
        self.reminders.lock().await.insert(key, reminder);
        Ok(())
    }

    async fn delete_reminder(&self, topic_id: &str, name: &str) -> Result<bool, StoreError> {
        let key = (topic_id.to_string(), name.to_string());
        Ok(self.reminders.lock().await.remove(&key).is_some())
    }

    async fn list_reminders(&self, topic_id: &str) -> Result<Vec<ReminderRow>, StoreError> {
        let g = self.reminders.lock().await;
        Ok(g.values().filter(|r| r.topic_id == topic_id).cloned().collect())
    }

    async fn fetch_due_reminders(&self, now_ms: u64, limit: usize) -> Result<Vec<ReminderRow>, StoreError> {
        let g = self.reminders.lock().await;
        let mut due: Vec<ReminderRow> = g.values().filter(|r| r.next_fire_at_ms <= now_ms).cloned().collect();
        due.sort_by(|a, b| {
            (a.next_fire_at_ms, &a.topic_id, &a.name).cmp(&(b.next_fire_at_ms, &b.topic_id, &b.name))
        });
        due.truncate(limit);
        Ok(due)
    }

    async fn advance_reminder(
        &self,
        topic_id: &str,
        name: &str,
        expected_fire_at_ms: u64,
        next_fire_at_ms: u64,
    ) -> Result<bool, StoreError> {
        let mut g = self.reminders.lock().await;
        match g.get_mut(&(topic_id.to_string(), name.to_string())) {
            Some(row) if row.next_fire_at_ms == expected_fire_at_ms => {
                row.next_fire_at_ms = next_fire_at_ms;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
