//! Local store: JSON values over a durable key-value backend.
//!
//! Lenient reads (`get`) fall back to a default and log a warning, so a
//! damaged value never takes the application down. Writes report their
//! failure but also log it; in-memory owners keep their copy as the source of
//! truth when a write fails.

mod backend;

pub use backend::{KvBackend, MemoryBackend};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{Entity, EntityId};
use crate::Result;

/// Key prefix of cached entity copies
pub const ENTITY_KEY_PREFIX: &str = "entity:";
/// Key of the persisted sync queue
pub const SYNC_QUEUE_KEY: &str = "sync_queue";
/// Key of the head operation's retry state
pub const SYNC_DELIVERY_KEY: &str = "sync_delivery_state";
/// Key of the dead-letter list
pub const DEAD_LETTER_KEY: &str = "sync_dead_letters";
/// Key of the recovery point records
pub const RECOVERY_POINTS_KEY: &str = "recovery_points";
/// Key prefix of recovery point snapshots
pub const RECOVERY_SNAPSHOT_PREFIX: &str = "recovery_snapshot:";

pub fn entity_key(id: &EntityId) -> String {
    format!("{ENTITY_KEY_PREFIX}{id}")
}

#[derive(Debug, Clone)]
pub struct LocalStore<B> {
    backend: B,
}

impl<B: KvBackend> LocalStore<B> {
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Read `key`, falling back to `default` when it is missing or unreadable.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.try_get(key).await {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(error) => {
                tracing::warn!("Failed to read '{}' from local store: {}", key, error);
                default
            }
        }
    }

    /// Read `key`, distinguishing a missing value from a broken one.
    pub async fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.get_raw(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let result = match serde_json::to_string(value) {
            Ok(raw) => self.backend.set_raw(key, &raw).await,
            Err(error) => Err(error.into()),
        };
        if let Err(error) = &result {
            tracing::warn!("Failed to write '{}' to local store: {}", key, error);
        }
        result
    }

    pub async fn remove(&self, key: &str) -> Result<()> {
        self.backend.remove(key).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await
    }

    /// Decoded entries under `prefix`. Entries that fail to decode are skipped.
    pub async fn entries_with_prefix<T: DeserializeOwned>(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, T)>> {
        let raw = self.backend.entries_with_prefix(prefix).await?;
        let mut entries = Vec::with_capacity(raw.len());
        for (key, value) in raw {
            match serde_json::from_str(&value) {
                Ok(value) => entries.push((key, value)),
                Err(error) => {
                    tracing::warn!("Skipping unreadable local store entry '{}': {}", key, error);
                }
            }
        }
        Ok(entries)
    }

    // Entity copies

    pub async fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        self.try_get(&entity_key(id)).await
    }

    pub async fn put_entity(&self, entity: &Entity) -> Result<()> {
        self.set(&entity_key(&entity.id), entity).await
    }

    /// Every cached entity copy, including soft-deleted ones.
    pub async fn entities(&self) -> Result<Vec<Entity>> {
        Ok(self
            .entries_with_prefix::<Entity>(ENTITY_KEY_PREFIX)
            .await?
            .into_iter()
            .map(|(_, entity)| entity)
            .collect())
    }

    /// Drop every cached entity copy.
    pub async fn clear_entities(&self) -> Result<()> {
        for (key, _) in self.backend.entries_with_prefix(ENTITY_KEY_PREFIX).await? {
            self.backend.remove(&key).await?;
        }
        Ok(())
    }
}
