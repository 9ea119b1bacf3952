#![allow(dead_code)]

pub mod fault_injection;
pub mod tracing_capture;

use async_trait::async_trait;
use durotopic::api::{ApiError, ApiRegistry};
use durotopic::runtime::TopicMetrics;
use durotopic::scheduling::{ReminderService, TimerService};
use durotopic::store::in_memory::InMemoryStore;
use durotopic::store::sqlite::SqliteStore;
use durotopic::store::{StoreError, TopicStore};
use durotopic::topic::{RetryPolicy, TopicServices};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub async fn create_sqlite_store_disk() -> (Arc<dyn TopicStore>, TempDir) {
    let td = tempfile::tempdir().unwrap();
    let db_path = td.path().join("test.db");
    std::fs::File::create(&db_path).unwrap();
    let db_url = format!("sqlite:{}", db_path.display());
    let store = Arc::new(SqliteStore::new(&db_url, None).await.unwrap()) as Arc<dyn TopicStore>;
    (store, td)
}

/// Poll `check` until it returns `Some` or `timeout_ms` elapses.
pub async fn wait_for<T, F, Fut>(timeout_ms: u64, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Some(v) = check().await {
            return Some(v);
        }
        if Instant::now() > deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Scripted api: pops one outcome per call, then repeats `fallback`.
pub struct ScriptedApi {
    script: Mutex<VecDeque<Result<i64, ApiError>>>,
    fallback: Result<i64, ApiError>,
    calls: AtomicU32,
}

impl ScriptedApi {
    pub fn new(script: Vec<Result<i64, ApiError>>, fallback: Result<i64, ApiError>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
        })
    }

    pub fn always(outcome: Result<i64, ApiError>) -> Arc<Self> {
        Self::new(Vec::new(), outcome)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl durotopic::api::ApiEndpoint for ScriptedApi {
    async fn query(&self, _query: String) -> Result<i64, ApiError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

pub fn registry(apis: &[(&str, Arc<ScriptedApi>)]) -> ApiRegistry {
    apis.iter()
        .fold(ApiRegistry::builder(), |b, (name, api)| {
            b.register_endpoint(*name, api.clone() as Arc<dyn durotopic::api::ApiEndpoint>)
        })
        .build()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub initial_delay: Duration,
    pub period: Duration,
    pub payload: String,
}

/// In-memory reminder service that records calls instead of scheduling.
#[derive(Default)]
pub struct RecordingReminders {
    pub active: Mutex<BTreeMap<(String, String), Registration>>,
    pub unregistered: Mutex<Vec<(String, String)>>,
}

impl RecordingReminders {
    pub fn names(&self, topic_id: &str) -> Vec<String> {
        self.active
            .lock()
            .unwrap()
            .keys()
            .filter(|(t, _)| t == topic_id)
            .map(|(_, n)| n.clone())
            .collect()
    }

    pub fn get(&self, topic_id: &str, name: &str) -> Option<Registration> {
        self.active
            .lock()
            .unwrap()
            .get(&(topic_id.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ReminderService for RecordingReminders {
    async fn register(
        &self,
        topic_id: &str,
        name: &str,
        initial_delay: Duration,
        period: Duration,
        payload: &str,
    ) -> Result<(), StoreError> {
        self.active.lock().unwrap().insert(
            (topic_id.to_string(), name.to_string()),
            Registration {
                initial_delay,
                period,
                payload: payload.to_string(),
            },
        );
        Ok(())
    }

    async fn unregister(&self, topic_id: &str, name: &str) -> Result<(), StoreError> {
        self.active
            .lock()
            .unwrap()
            .remove(&(topic_id.to_string(), name.to_string()));
        self.unregistered
            .lock()
            .unwrap()
            .push((topic_id.to_string(), name.to_string()));
        Ok(())
    }
}

/// Timer service that records registrations; tests fire timers by hand.
#[derive(Clone, Default)]
pub struct RecordingTimers {
    pub armed: Arc<Mutex<BTreeMap<String, Registration>>>,
    pub registrations: Arc<AtomicU32>,
}

impl RecordingTimers {
    pub fn is_armed(&self, name: &str) -> bool {
        self.armed.lock().unwrap().contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<Registration> {
        self.armed.lock().unwrap().get(name).cloned()
    }
}

impl TimerService for RecordingTimers {
    fn register(&mut self, name: &str, initial_delay: Duration, period: Duration, payload: &str) {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        self.armed.lock().unwrap().insert(
            name.to_string(),
            Registration {
                initial_delay,
                period,
                payload: payload.to_string(),
            },
        );
    }

    fn unregister(&mut self, name: &str) {
        self.armed.lock().unwrap().remove(name);
    }

    fn is_registered(&self, name: &str) -> bool {
        self.is_armed(name)
    }

    fn clear(&mut self) {
        self.armed.lock().unwrap().clear();
    }
}

/// Collaborators for driving a `Topic` directly.
pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub reminders: Arc<RecordingReminders>,
    pub timers: RecordingTimers,
    pub metrics: Arc<TopicMetrics>,
    pub services: TopicServices,
}

pub fn harness(apis: ApiRegistry) -> Harness {
    harness_with(Arc::new(InMemoryStore::new()), apis, RetryPolicy::default())
}

pub fn harness_with(store: Arc<InMemoryStore>, apis: ApiRegistry, policy: RetryPolicy) -> Harness {
    let reminders = Arc::new(RecordingReminders::default());
    let metrics = Arc::new(TopicMetrics::new());
    let services = TopicServices {
        store: store.clone(),
        apis,
        reminders: reminders.clone(),
        metrics: metrics.clone(),
        policy,
    };
    Harness {
        store,
        reminders,
        timers: RecordingTimers::default(),
        metrics,
        services,
    }
}
