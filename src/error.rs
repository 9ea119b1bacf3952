use crate::store::StoreError;

/// Failure of a topic command or trigger.
///
/// Transient endpoint failures never show up here: they are absorbed by the
/// retry state machine. Everything in this enum escapes the topic and is
/// logged at the mailbox boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    /// `Create` was called with an unusable schedule.
    #[error("invalid setup: {0}")]
    InvalidSetup(String),
    /// `Create` was called for a topic that already has a query.
    #[error("topic {0} was already created")]
    AlreadyCreated(String),
    /// A trigger arrived for a topic that was never created.
    #[error("topic {0} has not been created")]
    NotCreated(String),
    /// No endpoint is registered under this name.
    #[error("api {api} is not registered")]
    UnknownApi { api: String },
    /// The endpoint failed with a non-transient error.
    #[error("api {api} failed: {message}")]
    ApiFailed { api: String, message: String },
    /// Adding the api's count would overflow the total. Nothing is persisted.
    #[error("api {api} returned {count}, total would overflow")]
    TotalOverflow { api: String, count: i64 },
    /// Reading or writing the durable store failed.
    #[error("persistence failure: {0}")]
    Persistence(#[from] StoreError),
    /// Rejected runtime or topic options.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The runtime no longer accepts messages.
    #[error("runtime is shut down")]
    ShutDown,
}

impl TopicError {
    /// True when the failure came from the durable store.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}
