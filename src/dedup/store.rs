//! Replied-message storage (SQLite).
//!
//! A row exists for `(channel_id, message_id)` if and only if a reply was
//! posted for that message. Every call runs as its own statement on the pool,
//! so nothing is held open between ticks.

use crate::MessageId;
use crate::error::{DbError, Result};
use sqlx::SqlitePool;

/// Dedup ledger keyed by channel and message id.
#[derive(Clone)]
pub struct DedupStore {
    pool: SqlitePool,
}

fn persistence(operation: &'static str) -> impl FnOnce(sqlx::Error) -> DbError {
    move |error| DbError::Persistence(format!("{operation}: {error}"))
}

impl DedupStore {
    /// Create a new dedup store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the ledger table if it doesn't exist.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS replied_messages (
                channel_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                processed_at TIMESTAMP NOT NULL,
                PRIMARY KEY (channel_id, message_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(persistence("failed to create replied_messages table"))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_replied_messages_processed_at \
             ON replied_messages(processed_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(persistence("failed to create replied_messages index"))?;

        Ok(())
    }

    /// Whether a reply was already recorded for this message.
    pub async fn has_replied(&self, channel_id: &str, message_id: &MessageId) -> Result<bool> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM replied_messages WHERE channel_id = ? AND message_id = ?)",
        )
        .bind(channel_id)
        .bind(message_id.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(persistence("failed to check replied message"))?;

        Ok(exists != 0)
    }

    /// Record that a reply was posted. Recording the same message twice is a no-op.
    pub async fn record_replied(&self, channel_id: &str, message_id: &MessageId) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO replied_messages (channel_id, message_id, processed_at)
            VALUES (?, ?, ?)
            ON CONFLICT(channel_id, message_id) DO NOTHING
            "#,
        )
        .bind(channel_id)
        .bind(message_id.as_str())
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await
        .map_err(persistence("failed to record replied message"))?;

        if result.rows_affected() == 0 {
            tracing::debug!(%channel_id, %message_id, "reply already recorded");
        }

        Ok(())
    }

    /// Delete records processed longer than `older_than` ago. Returns rows removed.
    pub async fn retention_sweep(&self, older_than: chrono::Duration) -> Result<u64> {
        let cutoff = chrono::Utc::now() - older_than;

        let result = sqlx::query("DELETE FROM replied_messages WHERE processed_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(persistence("failed to sweep replied messages"))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_store() -> DedupStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite should connect");

        let store = DedupStore::new(pool);
        store.initialize().await.expect("schema should be created");
        store
    }

    #[tokio::test]
    async fn records_are_scoped_by_channel() {
        let store = setup_store().await;
        let id = MessageId::new("1001");

        assert!(!store.has_replied("general", &id).await.expect("lookup"));

        store.record_replied("general", &id).await.expect("record");

        assert!(store.has_replied("general", &id).await.expect("lookup"));
        assert!(!store.has_replied("random", &id).await.expect("lookup"));
    }

    #[tokio::test]
    async fn duplicate_records_are_harmless() {
        let store = setup_store().await;
        let id = MessageId::new("7");

        store.record_replied("general", &id).await.expect("first record");
        store
            .record_replied("general", &id)
            .await
            .expect("second record must not fail");

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM replied_messages")
            .fetch_one(&store.pool)
            .await
            .expect("count");
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn retention_sweep_only_removes_old_records() {
        let store = setup_store().await;

        sqlx::query(
            "INSERT INTO replied_messages (channel_id, message_id, processed_at) VALUES (?, ?, ?)",
        )
        .bind("general")
        .bind("1")
        .bind(chrono::Utc::now() - chrono::Duration::days(45))
        .execute(&store.pool)
        .await
            .expect("insert old record");
        store
            .record_replied("general", &MessageId::new("2"))
            .await
            .expect("record fresh");

        let removed = store
            .retention_sweep(chrono::Duration::days(30))
            .await
            .expect("sweep");

        assert_eq!(removed, 1);
        assert!(!store.has_replied("general", &MessageId::new("1")).await.expect("lookup"));
        assert!(store.has_replied("general", &MessageId::new("2")).await.expect("lookup"));
    }

    #[tokio::test]
    async fn storage_failures_surface_as_persistence_errors() {
        let store = setup_store().await;
        store.pool.close().await;

        let error = store
            .record_replied("general", &MessageId::new("3"))
            .await
            .expect_err("closed pool must fail");

        assert!(matches!(error, Error::Db(DbError::Persistence(_))));
        assert!(!error.is_fatal());
    }
}
