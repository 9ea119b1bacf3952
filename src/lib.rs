//! # durotopic
//!
//! Crash-recoverable topic workers. A topic fans one query out to a set of
//! named apis, adds every successful result count to a durable running total,
//! and keeps polling apis that fail transiently until a retry budget runs
//! out, at which point the api is disabled for good.
//!
//! ## Scheduling model
//!
//! - **Durable reminders** poll each api on its own period. They are stored
//!   next to the total, so they keep firing across deactivations and
//!   restarts without being re-registered.
//! - **Volatile timers** drive retries of a failing api every
//!   [`RetryPolicy::retry_period`]. They live and die with one activation; a
//!   crash mid-retry simply puts the api back on its reminder.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use durotopic::{ApiError, ApiRegistry, Client, Runtime, TopicSchedule};
//! use durotopic::store::in_memory::InMemoryStore;
//!
//! # async fn demo() -> Result<(), durotopic::TopicError> {
//! let apis = ApiRegistry::builder()
//!     .register("facebook", |_query: String| async move { Ok(5) })
//!     .register("twitter", |_query: String| async move { Err(ApiError::unavailable("rate limited")) })
//!     .build();
//!
//! let rt = Runtime::start(Arc::new(InMemoryStore::new()), apis).await;
//! let client = Client::new(rt.clone());
//! client
//!     .create_topic(
//!         "rust",
//!         "#rustlang",
//!         TopicSchedule::new()
//!             .every("facebook", Duration::from_secs(10))
//!             .every("twitter", Duration::from_secs(20)),
//!     )
//!     .await?;
//!
//! println!("total so far: {}", client.total("rust").await?);
//! rt.shutdown(None).await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod error;
pub mod runtime;
pub mod scheduling;
pub mod store;
pub mod topic;

pub use api::{ApiEndpoint, ApiError, ApiRegistry};
pub use client::{Client, WaitError};
pub use error::TopicError;
pub use runtime::{Runtime, RuntimeOptions};
pub use topic::{
    ProviderState, QueryOutcome, RetryPolicy, Topic, TopicMessage, TopicOptions, TopicSchedule, TopicServices,
    TopicSnapshot,
};
