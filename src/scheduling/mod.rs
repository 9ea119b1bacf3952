//! Scheduling primitives consumed by topic workers.
//!
//! Two independent kinds of registration exist:
//!
//! - **Durable reminders** ([`ReminderService`]) are persisted in the store and
//!   delivered by the [`ReminderDispatcher`]. They survive deactivation and
//!   process restarts; a topic never has to re-register them.
//! - **Volatile timers** ([`TimerService`]) live inside one activation. They are
//!   dropped on deactivation or crash and must be re-armed by the topic if it
//!   still needs them.
//!
//! Both are addressed by `(topic_id, name)`; a timer service is owned by a
//! single activation, so its methods take only the name.

use std::time::Duration;

use async_trait::async_trait;

use crate::store::StoreError;

pub mod reminders;
pub mod timers;

pub use reminders::{ReminderDispatcher, ReminderSink, StoreReminders};
pub use timers::{TimerFired, TokioTimers};

/// Durable, crash-surviving reminder registrations.
#[async_trait]
pub trait ReminderService: Send + Sync {
    /// Arm a reminder that fires after `initial_delay` and then every `period`,
    /// delivering `payload` each time. Re-registering a name replaces the
    /// previous registration.
    async fn register(
        &self,
        topic_id: &str,
        name: &str,
        initial_delay: Duration,
        period: Duration,
        payload: &str,
    ) -> Result<(), StoreError>;

    /// Permanently remove a reminder. No-op if absent.
    async fn unregister(&self, topic_id: &str, name: &str) -> Result<(), StoreError>;
}

/// Process-local timers owned by one topic activation.
pub trait TimerService: Send {
    /// Arm a timer that fires after `initial_delay` and then every `period`.
    /// A zero `period` arms a one-shot timer. Re-registering a name replaces
    /// the previous timer.
    fn register(&mut self, name: &str, initial_delay: Duration, period: Duration, payload: &str);

    /// Cancel a timer. No-op if absent.
    fn unregister(&mut self, name: &str);

    /// True while a timer with this name is armed.
    fn is_registered(&self, name: &str) -> bool;

    /// Cancel every timer. Called on deactivation.
    fn clear(&mut self);
}

/// Wall-clock milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub(crate) fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
