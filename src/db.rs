//! Database connection management.

use crate::dedup::DedupStore;
use crate::error::{DbError, Result};
use anyhow::Context as _;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::Path;

/// Database connections bundle.
pub struct Db {
    /// SQLite pool for the dedup ledger.
    pub sqlite: SqlitePool,

    /// LanceDB connection for context embeddings.
    pub lance: lancedb::Connection,
}

impl Db {
    /// Open (creating if needed) the SQLite file at `path` and the LanceDB
    /// directory next to it, and create the ledger table.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create data directory: {}", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let sqlite = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(DbError::SqliteConnect)?;

        DedupStore::new(sqlite.clone()).initialize().await?;

        let lance_path = path.with_extension("lancedb");
        std::fs::create_dir_all(&lance_path).with_context(|| {
            format!("failed to create LanceDB directory: {}", lance_path.display())
        })?;

        let lance = lancedb::connect(&lance_path.to_string_lossy())
            .execute()
            .await
            .map_err(|error| DbError::LanceConnect(error.to_string()))?;

        tracing::debug!(path = %path.display(), lance = %lance_path.display(), "databases ready");
        Ok(Self { sqlite, lance })
    }

    /// Close all database connections gracefully.
    pub async fn close(self) {
        self.sqlite.close().await;
        // LanceDB closes when dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MessageId;

    #[tokio::test]
    async fn creates_ledger_and_lance_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data").join("replybot.db");

        let db = Db::connect(&path).await.expect("databases open");
        let ledger = DedupStore::new(db.sqlite.clone());
        ledger
            .record_replied("chan-1", &MessageId::new("1"))
            .await
            .expect("ledger table exists");

        assert!(path.exists());
        assert!(dir.path().join("data").join("replybot.lancedb").is_dir());
        db.close().await;
    }
}
