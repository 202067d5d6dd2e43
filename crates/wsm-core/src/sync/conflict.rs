//! Last-writer-wins resolution between the local and remote copy

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::NewConflict;
use crate::models::{ConflictWinner, Entity, SyncConflict};
use crate::services::DatabaseService;
use crate::store::MemoryBackend;
use crate::Result;

/// Outcome of comparing the two copies of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Copy to return to the caller
    pub entity: Option<Entity>,
    /// The remote copy won and must overwrite the local one
    pub take_remote: bool,
    /// Set when the losing copy carried different content
    pub conflict: Option<NewConflict>,
}

/// Remote wins only when strictly newer (or the local copy is absent).
/// Equal timestamps keep the local copy.
pub fn resolve(local: Option<Entity>, remote: Option<Entity>) -> Resolution {
    match (local, remote) {
        (local, None) => Resolution {
            entity: local,
            take_remote: false,
            conflict: None,
        },
        (None, Some(remote)) => Resolution {
            entity: Some(remote),
            take_remote: true,
            conflict: None,
        },
        (Some(local), Some(remote)) => {
            let remote_wins = remote.updated_at > local.updated_at;
            let diverged = local.fields != remote.fields || local.is_deleted != remote.is_deleted;
            let conflict = diverged.then(|| NewConflict {
                entity_id: local.id.to_string(),
                local_updated_at: local.updated_at,
                incoming_updated_at: remote.updated_at,
                winner: if remote_wins {
                    ConflictWinner::Remote
                } else {
                    ConflictWinner::Local
                },
            });

            Resolution {
                entity: Some(if remote_wins { remote } else { local }),
                take_remote: remote_wins,
                conflict,
            }
        }
    }
}

/// Where the client records resolved conflicts.
#[allow(async_fn_in_trait)]
pub trait ConflictLog {
    async fn record_conflict(&self, conflict: &NewConflict) -> Result<SyncConflict>;
    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>>;
}

impl ConflictLog for DatabaseService {
    async fn record_conflict(&self, conflict: &NewConflict) -> Result<SyncConflict> {
        Self::record_conflict(self, conflict).await
    }

    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        Self::list_conflicts(self, limit).await
    }
}

/// In-memory conflict log paired with `MemoryBackend`.
#[derive(Debug, Clone, Default)]
pub struct MemoryConflictLog {
    conflicts: Arc<Mutex<Vec<SyncConflict>>>,
}

impl ConflictLog for MemoryConflictLog {
    async fn record_conflict(&self, conflict: &NewConflict) -> Result<SyncConflict> {
        let mut conflicts = self.conflicts.lock().await;
        let record = SyncConflict {
            id: i64::try_from(conflicts.len()).unwrap_or(i64::MAX).saturating_add(1),
            entity_id: conflict.entity_id.clone(),
            local_updated_at: conflict.local_updated_at,
            incoming_updated_at: conflict.incoming_updated_at,
            resolved_at: chrono::Utc::now().timestamp_millis(),
            strategy: "lww".to_string(),
            winner: conflict.winner,
        };
        conflicts.push(record.clone());
        Ok(record)
    }

    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let conflicts = self.conflicts.lock().await;
        Ok(conflicts.iter().rev().take(limit).cloned().collect())
    }
}

impl ConflictLog for MemoryBackend {
    async fn record_conflict(&self, conflict: &NewConflict) -> Result<SyncConflict> {
        self.conflict_log().record_conflict(conflict).await
    }

    async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.conflict_log().list_conflicts(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityKind;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};

    fn copies(local_at: i64, remote_at: i64) -> (Entity, Entity) {
        let mut local = Entity::new(EntityKind::Project, Map::new());
        local.updated_at = local_at;
        local.fields.insert("name".to_string(), json!("local"));
        let mut remote = local.clone();
        remote.updated_at = remote_at;
        remote.fields.insert("name".to_string(), json!("remote"));
        (local, remote)
    }

    #[test]
    fn remote_newer_wins() {
        let (local, remote) = copies(100, 200);
        let resolution = resolve(Some(local), Some(remote.clone()));
        assert_eq!(resolution.entity, Some(remote));
        assert!(resolution.take_remote);
        assert_eq!(
            resolution.conflict.map(|c| c.winner),
            Some(ConflictWinner::Remote)
        );
    }

    #[test]
    fn local_newer_wins() {
        let (local, remote) = copies(300, 200);
        let resolution = resolve(Some(local.clone()), Some(remote));
        assert_eq!(resolution.entity, Some(local));
        assert!(!resolution.take_remote);
        assert_eq!(
            resolution.conflict.map(|c| c.winner),
            Some(ConflictWinner::Local)
        );
    }

    #[test]
    fn equal_timestamps_keep_local() {
        let (local, remote) = copies(200, 200);
        let resolution = resolve(Some(local.clone()), Some(remote));
        assert_eq!(resolution.entity, Some(local));
        assert!(!resolution.take_remote);
    }

    #[test]
    fn identical_content_is_not_a_conflict() {
        let (local, _) = copies(100, 200);
        let mut remote = local.clone();
        remote.updated_at = 200;
        let resolution = resolve(Some(local), Some(remote));
        assert!(resolution.take_remote);
        assert!(resolution.conflict.is_none());
    }

    #[test]
    fn missing_sides() {
        let (local, remote) = copies(1, 2);
        assert!(resolve(None, Some(remote)).take_remote);
        assert_eq!(resolve(Some(local.clone()), None).entity, Some(local));
        assert_eq!(resolve(None, None).entity, None);
    }

    #[tokio::test]
    async fn memory_log_lists_newest_first() {
        let log = MemoryConflictLog::default();
        for winner in [ConflictWinner::Local, ConflictWinner::Remote] {
            log.record_conflict(&NewConflict {
                entity_id: "e".to_string(),
                local_updated_at: 1,
                incoming_updated_at: 2,
                winner,
            })
            .await
            .unwrap();
        }
        let listed = log.list_conflicts(1).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].winner, ConflictWinner::Remote);
    }
}
