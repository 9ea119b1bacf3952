//! In-process runtime hosting topic workers.
//!
//! Every topic identity gets exactly one mailbox task. Messages for a topic
//! (commands, reminder firings, retry timer firings) go through its
//! unbounded channel and are handled one at a time, so a topic never needs
//! locks. Different topics run concurrently.
//!
//! Topics are activated on the first message addressed to them and are
//! deactivated on request, after an optional idle timeout, or at shutdown.
//! A new activation of an identity never starts before the previous one has
//! finished.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::ApiRegistry;
use crate::error::TopicError;
use crate::scheduling::{ReminderDispatcher, ReminderSink, StoreReminders, TimerFired, TokioTimers};
use crate::store::{ReminderRow, TopicStore};
use crate::topic::{Topic, TopicMessage, TopicOptions, TopicServices, TopicSnapshot};

pub mod observability;

pub use observability::{LogFormat, MetricsSnapshot, ObservabilityConfig, TopicMetrics, init_logging};

/// Configuration options for the Runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// How often the reminder dispatcher polls the store for due reminders.
    /// Default: 50ms
    pub reminder_poll_interval_ms: u64,
    /// Maximum due reminders fetched per poll. Default: 100
    pub reminder_batch_size: usize,
    /// Deactivate a topic after this long without messages. Default: never
    pub topic_idle_timeout_ms: Option<u64>,
    /// How long `shutdown(None)` waits for topics to deactivate. Default: 5000ms
    pub shutdown_timeout_ms: u64,
    /// Retry settings applied to every topic.
    pub topic: TopicOptions,
    /// Logging and metrics settings. Logging is installed separately with
    /// [`init_logging`]; the runtime only reads the metrics fields.
    pub observability: ObservabilityConfig,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            reminder_poll_interval_ms: 50,
            reminder_batch_size: 100,
            topic_idle_timeout_ms: None,
            shutdown_timeout_ms: 5_000,
            topic: TopicOptions::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl RuntimeOptions {
    /// Parse options from a JSON document. Missing fields keep their defaults.
    ///
    /// # Errors
    ///
    /// `Configuration` for malformed JSON or values rejected by [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self, TopicError> {
        let options: Self =
            serde_json::from_str(json).map_err(|e| TopicError::Configuration(format!("invalid options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// # Errors
    ///
    /// `Configuration` for zero intervals, batch sizes or retry budgets.
    pub fn validate(&self) -> Result<(), TopicError> {
        if self.reminder_poll_interval_ms == 0 {
            return Err(TopicError::Configuration("reminder_poll_interval_ms must be positive".into()));
        }
        if self.reminder_batch_size == 0 {
            return Err(TopicError::Configuration("reminder_batch_size must be positive".into()));
        }
        if self.topic_idle_timeout_ms == Some(0) {
            return Err(TopicError::Configuration("topic_idle_timeout_ms must be positive".into()));
        }
        if self.observability.metrics_export_interval_ms == 0 {
            return Err(TopicError::Configuration("metrics_export_interval_ms must be positive".into()));
        }
        self.topic.validate()
    }
}

type Reply = oneshot::Sender<Result<(), TopicError>>;

enum Mail {
    Message { message: TopicMessage, reply: Option<Reply> },
    Snapshot { reply: oneshot::Sender<Result<TopicSnapshot, TopicError>> },
    Deactivate { done: oneshot::Sender<()> },
}

struct TopicHandle {
    tx: mpsc::UnboundedSender<Mail>,
    join: JoinHandle<()>,
}

/// In-process runtime that hosts topics and delivers their reminders.
pub struct Runtime {
    me: Weak<Runtime>,
    services: TopicServices,
    options: RuntimeOptions,
    topics: Mutex<HashMap<String, TopicHandle>>,
    joins: Mutex<Vec<JoinHandle<()>>>,
    shutdown_flag: AtomicBool,
}

/// Routes reminder firings into the runtime without keeping it alive.
struct RuntimeSink(Weak<Runtime>);

impl ReminderSink for RuntimeSink {
    fn deliver(&self, reminder: &ReminderRow) -> bool {
        let Some(rt) = self.0.upgrade() else {
            return false;
        };
        rt.tell(
            &reminder.topic_id,
            TopicMessage::Reminder {
                api: reminder.payload.clone(),
            },
        )
        .is_ok()
    }
}

impl Runtime {
    /// Start a runtime with default options.
    pub async fn start(store: Arc<dyn TopicStore>, apis: ApiRegistry) -> Arc<Self> {
        Self::launch(store, apis, RuntimeOptions::default(), TopicMetrics::new())
    }

    /// Start a runtime with custom options.
    ///
    /// # Errors
    ///
    /// `Configuration` if the options do not validate or the metrics
    /// exporter cannot be created.
    pub async fn start_with_options(
        store: Arc<dyn TopicStore>,
        apis: ApiRegistry,
        options: RuntimeOptions,
    ) -> Result<Arc<Self>, TopicError> {
        options.validate()?;
        let metrics = TopicMetrics::from_config(&options.observability).map_err(TopicError::Configuration)?;
        Ok(Self::launch(store, apis, options, metrics))
    }

    fn launch(
        store: Arc<dyn TopicStore>,
        apis: ApiRegistry,
        options: RuntimeOptions,
        metrics: TopicMetrics,
    ) -> Arc<Self> {
        let services = TopicServices {
            reminders: Arc::new(StoreReminders::new(store.clone())),
            store,
            apis,
            metrics: Arc::new(metrics),
            policy: options.topic.retry_policy(),
        };
        let runtime = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            services,
            options,
            topics: Mutex::new(HashMap::new()),
            joins: Mutex::new(Vec::new()),
            shutdown_flag: AtomicBool::new(false),
        });

        let dispatcher = ReminderDispatcher::new(
            runtime.services.store.clone(),
            Arc::new(RuntimeSink(runtime.me.clone())),
            Duration::from_millis(runtime.options.reminder_poll_interval_ms),
            runtime.options.reminder_batch_size,
        );
        let handle = dispatcher.start();
        lock(&runtime.joins).push(handle);

        info!(
            target: "durotopic::runtime",
            apis = ?runtime.services.apis.list_names(),
            max_retries = runtime.services.policy.max_retries,
            metrics_exporting = runtime.services.metrics.exporting(),
            "Runtime started"
        );
        runtime
    }

    pub fn store(&self) -> Arc<dyn TopicStore> {
        self.services.store.clone()
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.services.metrics.snapshot()
    }

    /// Identities with a live activation.
    pub fn active_topics(&self) -> Vec<String> {
        let topics = lock(&self.topics);
        let mut ids: Vec<String> = topics
            .iter()
            .filter(|(_, h)| !h.tx.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Enqueue a message without waiting for it to be processed.
    ///
    /// # Errors
    ///
    /// `ShutDown` once the runtime is shutting down.
    pub fn tell(&self, topic_id: &str, message: TopicMessage) -> Result<(), TopicError> {
        self.route(topic_id, Mail::Message { message, reply: None })
    }

    /// Enqueue a message and wait for the topic's result.
    ///
    /// # Errors
    ///
    /// Whatever the topic returned, or `ShutDown`.
    pub async fn ask(&self, topic_id: &str, message: TopicMessage) -> Result<(), TopicError> {
        let (tx, rx) = oneshot::channel();
        self.route(
            topic_id,
            Mail::Message {
                message,
                reply: Some(tx),
            },
        )?;
        rx.await.map_err(|_| TopicError::ShutDown)?
    }

    /// In-memory state of a topic, activating it if needed.
    ///
    /// # Errors
    ///
    /// `ShutDown`, or the activation error if the topic cannot be activated.
    pub async fn snapshot(&self, topic_id: &str) -> Result<TopicSnapshot, TopicError> {
        let (tx, rx) = oneshot::channel();
        self.route(topic_id, Mail::Snapshot { reply: tx })?;
        rx.await.map_err(|_| TopicError::ShutDown)?
    }

    /// Deactivate a topic and wait until it is gone.
    ///
    /// Volatile timers are dropped, durable reminders stay. Returns `false`
    /// if the topic was not active.
    pub async fn deactivate(&self, topic_id: &str) -> bool {
        let (tx, rx) = oneshot::channel();
        let sent = {
            let topics = lock(&self.topics);
            match topics.get(topic_id) {
                Some(handle) => handle.tx.send(Mail::Deactivate { done: tx }).is_ok(),
                None => false,
            }
        };
        if !sent {
            return false;
        }
        let _ = rx.await;

        let mut topics = lock(&self.topics);
        if topics.get(topic_id).is_some_and(|h| h.tx.is_closed()) {
            topics.remove(topic_id);
        }
        true
    }

    /// Stop the reminder dispatcher and deactivate every topic.
    ///
    /// Waits up to `timeout` (default `shutdown_timeout_ms`) for topics to
    /// finish their current message, then aborts the rest.
    pub async fn shutdown(&self, timeout: Option<Duration>) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        for j in lock(&self.joins).drain(..) {
            j.abort();
        }

        let handles: Vec<(String, TopicHandle)> = lock(&self.topics).drain().collect();
        let mut joins = Vec::with_capacity(handles.len());
        for (_id, handle) in handles {
            let (done, _rx) = oneshot::channel();
            let _ = handle.tx.send(Mail::Deactivate { done });
            joins.push(handle.join);
        }

        let aborts: Vec<_> = joins.iter().map(|j| j.abort_handle()).collect();
        let timeout = timeout.unwrap_or(Duration::from_millis(self.options.shutdown_timeout_ms));
        if tokio::time::timeout(timeout, futures::future::join_all(joins)).await.is_err() {
            warn!(target: "durotopic::runtime", ?timeout, "Topics did not deactivate in time, aborting");
            for a in aborts {
                a.abort();
            }
        }
        self.services.metrics.shutdown_exporter();
        info!(target: "durotopic::runtime", "Runtime shut down");
    }

    fn route(&self, topic_id: &str, mail: Mail) -> Result<(), TopicError> {
        if self.shutdown_flag.load(Ordering::SeqCst) {
            return Err(TopicError::ShutDown);
        }
        let mut topics = lock(&self.topics);
        let mut mail = mail;
        let mut previous = None;
        loop {
            let handle = match topics.remove(topic_id) {
                Some(handle) => handle,
                None => self.spawn_topic(topic_id, previous.take()),
            };
            match handle.tx.send(mail) {
                Ok(()) => {
                    topics.insert(topic_id.to_string(), handle);
                    return Ok(());
                }
                Err(mpsc::error::SendError(rejected)) => {
                    // Previous activation is closing; chain the next one after it
                    mail = rejected;
                    previous = Some(handle.join);
                }
            }
        }
    }

    fn spawn_topic(&self, topic_id: &str, previous: Option<JoinHandle<()>>) -> TopicHandle {
        let (tx, rx) = mpsc::unbounded_channel::<Mail>();
        let timer_tx = tx.downgrade();
        let timers = TokioTimers::new(move |fired: TimerFired| match timer_tx.upgrade() {
            Some(tx) => tx
                .send(Mail::Message {
                    message: TopicMessage::RetryTimer { api: fired.payload },
                    reply: None,
                })
                .is_ok(),
            None => false,
        });

        let id = topic_id.to_string();
        let services = self.services.clone();
        let idle = self.options.topic_idle_timeout_ms.map(Duration::from_millis);
        let me = self.me.clone();
        let join = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            run_mailbox(id.clone(), services, Box::new(timers), rx, idle).await;
            if let Some(rt) = me.upgrade() {
                rt.forget_closed(&id);
            }
        });
        debug!(target: "durotopic::runtime", topic_id, "Spawned topic mailbox");
        TopicHandle { tx, join }
    }
}

impl Runtime {
    /// Drop the routing entry of a finished mailbox. An entry that was
    /// already replaced by a newer activation is left alone.
    fn forget_closed(&self, topic_id: &str) {
        let mut topics = lock(&self.topics);
        if topics.get(topic_id).is_some_and(|h| h.tx.is_closed()) {
            topics.remove(topic_id);
            debug!(target: "durotopic::runtime", topic_id, "Forgot closed topic mailbox");
        }
    }

    #[cfg(test)]
    fn routed_topics(&self) -> usize {
        lock(&self.topics).len()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_mailbox(
    id: String,
    services: TopicServices,
    timers: Box<TokioTimers>,
    mut rx: mpsc::UnboundedReceiver<Mail>,
    idle: Option<Duration>,
) {
    let metrics = services.metrics.clone();
    let mut topic = match Topic::activate(id.clone(), services, timers).await {
        Ok(topic) => topic,
        Err(e) => {
            error!(target: "durotopic::runtime", topic_id = %id, error = %e, "Topic activation failed");
            metrics.record_trigger_failure();
            rx.close();
            while let Some(mail) = rx.recv().await {
                match mail {
                    Mail::Message { reply: Some(reply), .. } => {
                        let _ = reply.send(Err(e.clone()));
                    }
                    Mail::Snapshot { reply } => {
                        let _ = reply.send(Err(e.clone()));
                    }
                    Mail::Deactivate { done } => {
                        let _ = done.send(());
                    }
                    Mail::Message { reply: None, .. } => {}
                }
            }
            return;
        }
    };

    let mut waiters = Vec::new();
    loop {
        let next = match idle {
            Some(idle) => match tokio::time::timeout(idle, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!(target: "durotopic::runtime", topic_id = %id, "Topic idle, deactivating");
                    break;
                }
            },
            None => rx.recv().await,
        };
        match next {
            Some(Mail::Deactivate { done }) => {
                waiters.push(done);
                break;
            }
            Some(mail) => process(&mut topic, mail, &metrics).await,
            None => break,
        }
    }

    // Anything accepted before the close still belongs to this activation
    rx.close();
    while let Some(mail) = rx.recv().await {
        match mail {
            Mail::Deactivate { done } => waiters.push(done),
            mail => process(&mut topic, mail, &metrics).await,
        }
    }

    topic.deactivate();
    for done in waiters {
        let _ = done.send(());
    }
}

async fn process(topic: &mut Topic, mail: Mail, metrics: &TopicMetrics) {
    match mail {
        Mail::Message { message, reply } => {
            let kind = message.kind();
            let result = topic.handle(message).await;
            if let Err(e) = &result {
                metrics.record_trigger_failure();
                error!(
                    target: "durotopic::runtime",
                    topic_id = %topic.id(),
                    kind,
                    error = %e,
                    "Topic failed to process message"
                );
            }
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
        }
        Mail::Snapshot { reply } => {
            let _ = reply.send(Ok(topic.snapshot()));
        }
        Mail::Deactivate { done } => {
            let _ = done.send(());
        }
    }
}
