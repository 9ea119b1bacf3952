/// Store-specific error with retry classification
///
/// Stores return this error type to indicate whether a failed read or write
/// is worth repeating. The topic worker itself never retries store
/// operations; the classification is carried upward so the surrounding
/// runtime (or the caller of a command) can decide.
///
/// # Error Classification
///
/// **Retryable (is_retryable = true)**:
/// - Database busy/locked
/// - Connection timeouts
/// - Temporary resource exhaustion
///
/// **Non-retryable (is_retryable = false)**:
/// - Constraint violations
/// - Corrupted rows (e.g. a total that does not fit in `i64`)
/// - Configuration errors
///
/// # Example Usage
///
/// ```rust
/// use durotopic::store::StoreError;
///
/// let busy = StoreError::retryable("write_total", "Database is busy");
/// assert!(busy.is_retryable());
///
/// let corrupt = StoreError::permanent("read_total", "total column is not an integer");
/// assert!(!corrupt.is_retryable());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation}: {message}")]
pub struct StoreError {
    /// Operation that failed (e.g., "read_total", "upsert_reminder")
    pub operation: String,
    /// Human-readable error message
    pub message: String,
    /// Whether this error should be retried
    pub retryable: bool,
}

impl StoreError {
    /// Create a retryable (transient) error
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable (permanent) error
    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Classify a sqlx error for the given operation.
    pub(crate) fn from_sqlx(operation: &str, e: sqlx::Error) -> Self {
        let error_msg = e.to_string();

        if error_msg.contains("database is locked") || error_msg.contains("SQLITE_BUSY") {
            return Self::retryable(operation, format!("Database locked: {error_msg}"));
        }

        if error_msg.contains("UNIQUE constraint") || error_msg.contains("PRIMARY KEY") {
            return Self::permanent(operation, format!("Constraint violation: {error_msg}"));
        }

        if matches!(e, sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_))
            || error_msg.contains("connection")
            || error_msg.contains("timeout")
        {
            return Self::retryable(operation, format!("Connection error: {error_msg}"));
        }

        if matches!(e, sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_)) {
            return Self::permanent(operation, format!("Decode error: {error_msg}"));
        }

        // Default: treat as retryable
        Self::retryable(operation, error_msg)
    }
}
