//! Key-value repository backing the client's local store

use crate::error::Result;
use libsql::{params, Connection};

/// Trait for raw key-value storage operations (async)
#[allow(async_fn_in_trait)]
pub trait KeyValueRepository {
    /// Read the raw value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Insert or replace the value stored under `key`
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; missing keys are not an error
    async fn remove(&self, key: &str) -> Result<()>;

    /// Remove every key
    async fn clear(&self) -> Result<()>;

    /// All entries whose key starts with `prefix`, ordered by key
    async fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

/// libSQL implementation of `KeyValueRepository`
pub struct LibSqlKeyValueRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlKeyValueRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl KeyValueRepository for LibSqlKeyValueRepository<'_> {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM kv_store WHERE key = ?", [key])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
                params![key, value, now],
            )
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv_store WHERE key = ?", [key])
            .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.conn.execute("DELETE FROM kv_store", ()).await?;
        Ok(())
    }

    async fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        // substr comparison avoids LIKE wildcard escaping for '_' and '%'
        let mut rows = self
            .conn
            .query(
                "SELECT key, value FROM kv_store
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key ASC",
                [prefix],
            )
            .await?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push((row.get::<String>(0)?, row.get::<String>(1)?));
        }
        Ok(entries)
    }
}
