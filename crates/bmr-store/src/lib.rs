//! SQLite-backed cursor store.
//!
//! One row per source chain address, holding the bincode-encoded recovery
//! cursor. The pool is capped at a single connection; SQLite allows one
//! writer and the store is the only writer of its file.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use bmr_core::{BtpAddress, Cursor, CursorStore, RelayError};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("cursor encoding error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        RelayError::Store(err.to_string())
    }
}

pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    /// Open (creating if necessary) the store at `path`, including its
    /// parent directory.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5000));
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cursors (
                address TEXT PRIMARY KEY,
                state BLOB NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        info!(path = %path.display(), "cursor store opened");
        Ok(SqliteCursorStore { pool })
    }
}

#[async_trait]
impl CursorStore for SqliteCursorStore {
    async fn get(&self, link: &BtpAddress) -> Result<Option<Cursor>, RelayError> {
        let row: Option<(Vec<u8>,)> =
            sqlx::query_as("SELECT state FROM cursors WHERE address = ?")
                .bind(link.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(StoreError::from)?;
        row.map(|(blob,)| bincode::deserialize(&blob).map_err(StoreError::from))
            .transpose()
            .map_err(RelayError::from)
    }

    async fn set(&self, link: &BtpAddress, cursor: &Cursor) -> Result<(), RelayError> {
        let blob = bincode::serialize(cursor).map_err(StoreError::from)?;
        sqlx::query("INSERT OR REPLACE INTO cursors (address, state) VALUES (?, ?)")
            .bind(link.to_string())
            .bind(blob)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> BtpAddress {
        "btp://0x1.icon/cx0000000000000000000000000000000000000000"
            .parse()
            .unwrap()
    }

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCursorStore::open(&dir.path().join("cursors.db"))
            .await
            .unwrap();
        assert_eq!(store.get(&address()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn round_trips_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCursorStore::open(&dir.path().join("cursors.db"))
            .await
            .unwrap();
        let link = address();

        let first = Cursor {
            src_height: 100,
            dst_height: 2000,
        };
        store.set(&link, &first).await.unwrap();
        assert_eq!(store.get(&link).await.unwrap(), Some(first));

        let second = Cursor {
            src_height: 101,
            dst_height: 2010,
        };
        store.set(&link, &second).await.unwrap();
        assert_eq!(store.get(&link).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/cursors.db");
        let cursor = Cursor {
            src_height: 42,
            dst_height: 420,
        };
        {
            let store = SqliteCursorStore::open(&path).await.unwrap();
            store.set(&address(), &cursor).await.unwrap();
        }
        let store = SqliteCursorStore::open(&path).await.unwrap();
        assert_eq!(store.get(&address()).await.unwrap(), Some(cursor));
    }
}
