use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use tracing::debug;

use super::{ReminderRow, StoreError, TopicStore};

/// Configuration options for [`SqliteStore`]
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// `PRAGMA busy_timeout` in milliseconds.
    pub busy_timeout_ms: u64,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            busy_timeout_ms: 60_000,
        }
    }
}

/// SQLite-backed topic store.
///
/// Totals, queries and reminder rows survive process restarts when a file
/// database is used. Every write is a single statement, so no explicit
/// transactions are needed.
pub struct SqliteStore {
    pool: SqlitePool,
}

fn ms_to_db(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn ms_from_db(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

impl SqliteStore {
    /// Open (and initialize) a SQLite store.
    ///
    /// # Arguments
    /// * `database_url` - SQLite connection string (e.g., "sqlite:data.db" or "sqlite::memory:")
    /// * `options` - Pool and pragma settings; `None` uses defaults
    ///
    /// # Errors
    ///
    /// Returns an error if database connection or schema initialization fails.
    pub async fn new(database_url: &str, options: Option<SqliteOptions>) -> Result<Self, sqlx::Error> {
        let options = options.unwrap_or_default();
        let is_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
        let busy_timeout_ms = options.busy_timeout_ms;
        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    if is_memory {
                        sqlx::query("PRAGMA journal_mode = MEMORY").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA synchronous = OFF").execute(&mut *conn).await?;
                    } else {
                        sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut *conn).await?;
                    }
                    sqlx::query(&format!("PRAGMA busy_timeout = {busy_timeout_ms}"))
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        Self::create_schema(&pool).await?;
        debug!(target: "durotopic::store::sqlite", database_url, "SQLite store ready");
        Ok(Self { pool })
    }

    /// Convenience: shared in-memory database for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if database connection or schema initialization fails.
    pub async fn new_in_memory() -> Result<Self, sqlx::Error> {
        // shared cache so every pooled connection sees the same database
        Self::new("sqlite::memory:?cache=shared", None).await
    }

    /// Force a WAL checkpoint so all changes land in the main database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint operation fails.
    pub async fn checkpoint(&self) -> Result<(), sqlx::Error> {
        sqlx::query("PRAGMA wal_checkpoint(FULL)").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the pool. Pending operations complete first.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                topic_id TEXT PRIMARY KEY,
                query TEXT,
                total INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reminders (
                topic_id TEXT NOT NULL,
                name TEXT NOT NULL,
                payload TEXT NOT NULL,
                period_ms INTEGER NOT NULL,
                next_fire_at_ms INTEGER NOT NULL,
                PRIMARY KEY (topic_id, name)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_reminders_due ON reminders(next_fire_at_ms)")
            .execute(pool)
            .await?;

        Ok(())
    }

    fn reminder_from_row(row: &SqliteRow) -> Result<ReminderRow, sqlx::Error> {
        Ok(ReminderRow {
            topic_id: row.try_get("topic_id")?,
            name: row.try_get("name")?,
            payload: row.try_get("payload")?,
            period_ms: ms_from_db(row.try_get("period_ms")?),
            next_fire_at_ms: ms_from_db(row.try_get("next_fire_at_ms")?),
        })
    }
}

#[async_trait::async_trait]
impl TopicStore for SqliteStore {
    async fn read_total(&self, topic_id: &str) -> Result<i64, StoreError> {
        let total: Option<i64> = sqlx::query_scalar("SELECT total FROM topics WHERE topic_id = ?")
            .bind(topic_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("read_total", e))?;
        Ok(total.unwrap_or(0))
    }

    async fn write_total(&self, topic_id: &str, total: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO topics (topic_id, total) VALUES (?, ?)
            ON CONFLICT(topic_id) DO UPDATE SET total = excluded.total, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(topic_id)
        .bind(total)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("write_total", e))?;
        debug!(target: "durotopic::store::sqlite", topic_id, total, "write_total");
        Ok(())
    }

    async fn read_query(&self, topic_id: &str) -> Result<Option<String>, StoreError> {
        let query: Option<Option<String>> = sqlx::query_scalar("SELECT query FROM topics WHERE topic_id = ?")
            .bind(topic_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("read_query", e))?;
        Ok(query.flatten())
    }

    async fn write_query(&self, topic_id: &str, query: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO topics (topic_id, query) VALUES (?, ?)
            ON CONFLICT(topic_id) DO UPDATE SET query = excluded.query, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(topic_id)
        .bind(query)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("write_query", e))?;
        Ok(())
    }

    async fn upsert_reminder(&self, reminder: ReminderRow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO reminders (topic_id, name, payload, period_ms, next_fire_at_ms) VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(topic_id, name) DO UPDATE SET
                payload = excluded.payload,
                period_ms = excluded.period_ms,
                next_fire_at_ms = excluded.next_fire_at_ms
            "#,
        )
        .bind(&reminder.topic_id)
        .bind(&reminder.name)
        .bind(&reminder.payload)
        .bind(ms_to_db(reminder.period_ms))
        .bind(ms_to_db(reminder.next_fire_at_ms))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("upsert_reminder", e))?;
        debug!(
            target: "durotopic::store::sqlite",
            topic_id = %reminder.topic_id,
            name = %reminder.name,
            period_ms = reminder.period_ms,
            "upsert_reminder"
        );
        Ok(())
    }

    async fn delete_reminder(&self, topic_id: &str, name: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM reminders WHERE topic_id = ? AND name = ?")
            .bind(topic_id)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::from_sqlx("delete_reminder", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_reminders(&self, topic_id: &str) -> Result<Vec<ReminderRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT topic_id, name, payload, period_ms, next_fire_at_ms FROM reminders WHERE topic_id = ? ORDER BY name",
        )
        .bind(topic_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("list_reminders", e))?;
        rows.iter()
            .map(Self::reminder_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::from_sqlx("list_reminders", e))
    }

    async fn fetch_due_reminders(&self, now_ms: u64, limit: usize) -> Result<Vec<ReminderRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT topic_id, name, payload, period_ms, next_fire_at_ms FROM reminders
            WHERE next_fire_at_ms <= ?
            ORDER BY next_fire_at_ms, topic_id, name
            LIMIT ?
            "#,
        )
        .bind(ms_to_db(now_ms))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("fetch_due_reminders", e))?;
        rows.iter()
            .map(Self::reminder_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::from_sqlx("fetch_due_reminders", e))
    }

    async fn advance_reminder(
        &self,
        topic_id: &str,
        name: &str,
        expected_fire_at_ms: u64,
        next_fire_at_ms: u64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE reminders SET next_fire_at_ms = ? WHERE topic_id = ? AND name = ? AND next_fire_at_ms = ?",
        )
        .bind(ms_to_db(next_fire_at_ms))
        .bind(topic_id)
        .bind(name)
        .bind(ms_to_db(expected_fire_at_ms))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::from_sqlx("advance_reminder", e))?;
        Ok(result.rows_affected() == 1)
    }
}
