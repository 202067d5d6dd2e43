//! Raw key-value backends for the local store

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::services::DatabaseService;
use crate::sync::MemoryConflictLog;
use crate::Result;

/// Durable string-to-string storage the local store writes JSON text into.
#[allow(async_fn_in_trait)]
pub trait KvBackend {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;
    async fn set_raw(&self, key: &str, value: &str) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
    async fn clear(&self) -> Result<()>;
    /// Entries whose key starts with `prefix`, ordered by key
    async fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>>;
}

impl KvBackend for DatabaseService {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.kv_get(key).await
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        self.kv_set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.kv_remove(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.kv_clear().await
    }

    async fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        self.kv_entries_with_prefix(prefix).await
    }
}

/// In-memory backend, used by tests and throwaway stores.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    conflicts: MemoryConflictLog,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn conflict_log(&self) -> &MemoryConflictLog {
        &self.conflicts
    }
}

impl KvBackend for MemoryBackend {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.lock().await.clear();
        Ok(())
    }

    async fn entries_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn memory_backend_prefix_scan() {
        let backend = MemoryBackend::new();
        backend.set_raw("entity:b", "2").await.unwrap();
        backend.set_raw("entity:a", "1").await.unwrap();
        backend.set_raw("sync_queue", "[]").await.unwrap();

        assert_eq!(
            backend.entries_with_prefix("entity:").await.unwrap(),
            vec![
                ("entity:a".to_string(), "1".to_string()),
                ("entity:b".to_string(), "2".to_string()),
            ]
        );

        backend.clear().await.unwrap();
        assert!(backend.entries_with_prefix("").await.unwrap().is_empty());
    }
}
