use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::TimerService;

/// A volatile timer firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub name: String,
    pub payload: String,
}

type Deliver = Arc<dyn Fn(TimerFired) -> bool + Send + Sync>;

/// [`TimerService`] backed by one tokio task per armed timer.
///
/// Every firing is handed to the `deliver` callback; a callback returning
/// `false` (receiver gone) stops that timer. A zero period fires once. Dropping the service cancels all
/// of its timers, which is what makes them volatile.
pub struct TokioTimers {
    deliver: Deliver,
    timers: HashMap<String, JoinHandle<()>>,
}

impl TokioTimers {
    pub fn new(deliver: impl Fn(TimerFired) -> bool + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
            timers: HashMap::new(),
        }
    }

    /// Number of armed timers.
    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

impl TimerService for TokioTimers {
    fn register(&mut self, name: &str, initial_delay: Duration, period: Duration, payload: &str) {
        self.unregister(name);
        let deliver = self.deliver.clone();
        let fired = TimerFired {
            name: name.to_string(),
            payload: payload.to_string(),
        };
        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            loop {
                if !deliver(fired.clone()) || period.is_zero() {
                    break;
                }
                tokio::time::sleep(period).await;
            }
        });
        self.timers.insert(name.to_string(), handle);
    }

    fn unregister(&mut self, name: &str) {
        if let Some(handle) = self.timers.remove(name) {
            handle.abort();
        }
    }

    fn is_registered(&self, name: &str) -> bool {
        self.timers.get(name).is_some_and(|h| !h.is_finished())
    }

    fn clear(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

impl Drop for TokioTimers {
    fn drop(&mut self) {
        self.clear();
    }
}
