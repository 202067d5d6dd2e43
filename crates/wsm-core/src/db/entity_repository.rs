//! Authoritative entity store used by the API server

use crate::error::{Error, Result};
use crate::models::{ConflictWinner, Entity, EntityId, OperationKind, SyncOperation};
use libsql::{params, Connection};

use super::conflict_repository::{LibSqlConflictRepository, NewConflict};

/// An entity together with the user that owns it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub owner_id: String,
    pub entity: Entity,
}

/// Result of applying a sync operation
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyOutcome {
    /// The operation id was already applied; nothing changed
    pub duplicate: bool,
    /// The incoming copy was older than the stored one and was ignored
    pub stale: bool,
    /// Stored copy after the operation
    pub entity: Option<Entity>,
}

/// Trait for authoritative entity storage (async)
#[allow(async_fn_in_trait)]
pub trait EntityRepository {
    /// Get an entity and its owner by ID
    async fn get(&self, id: &EntityId) -> Result<Option<StoredEntity>>;

    /// Apply a sync operation on behalf of `user_id`, exactly once per operation id
    async fn apply_operation(
        &self,
        user_id: &str,
        operation: &SyncOperation,
        now_ms: i64,
    ) -> Result<ApplyOutcome>;
}

/// libSQL implementation of `EntityRepository`
pub struct LibSqlEntityRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlEntityRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    async fn is_applied(&self, operation: &SyncOperation) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM applied_operations WHERE operation_id = ?",
                [operation.id.as_str()],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }

    async fn upsert(&self, owner_id: &str, entity: &Entity) -> Result<()> {
        let body = serde_json::to_string(entity)?;
        self.conn
            .execute(
                "INSERT INTO remote_entities (id, kind, owner_id, updated_at, is_deleted, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     updated_at = excluded.updated_at,
                     is_deleted = excluded.is_deleted,
                     body = excluded.body",
                params![
                    entity.id.as_str(),
                    entity.kind.as_str(),
                    owner_id,
                    entity.updated_at,
                    i32::from(entity.is_deleted),
                    body
                ],
            )
            .await?;
        Ok(())
    }

    async fn apply_in_transaction(
        &self,
        user_id: &str,
        operation: &SyncOperation,
        incoming: Entity,
        now_ms: i64,
    ) -> Result<ApplyOutcome> {
        let existing = self.get(&operation.entity.id).await?;

        // Ownership is checked before the duplicate lookup so a replayed id
        // cannot be used to read another user's entity.
        if let Some(stored) = existing.as_ref() {
            if stored.owner_id != user_id {
                return Err(Error::Forbidden(format!(
                    "entity {} belongs to another user",
                    operation.entity
                )));
            }
        }

        if self.is_applied(operation).await? {
            tracing::debug!(operation = %operation.id, "Skipping already applied operation");
            return Ok(ApplyOutcome {
                duplicate: true,
                stale: false,
                entity: existing.map(|stored| stored.entity),
            });
        }

        let mut incoming = incoming;
        if operation.kind == OperationKind::Delete {
            incoming.is_deleted = true;
        }

        let stale = existing
            .as_ref()
            .is_some_and(|stored| incoming.updated_at < stored.entity.updated_at);

        let entity = if stale {
            let stored = existing.map(|stored| stored.entity);
            if let Some(current) = stored.as_ref() {
                LibSqlConflictRepository::new(self.conn)
                    .record(&NewConflict {
                        entity_id: current.id.as_str(),
                        local_updated_at: current.updated_at,
                        incoming_updated_at: incoming.updated_at,
                        winner: ConflictWinner::Local,
                    })
                    .await?;
            }
            stored
        } else {
            self.upsert(user_id, &incoming).await?;
            Some(incoming)
        };

        self.conn
            .execute(
                "INSERT INTO applied_operations (operation_id, entity_id, user_id, applied_at)
                 VALUES (?, ?, ?, ?)",
                params![
                    operation.id.as_str(),
                    operation.entity.id.as_str(),
                    user_id,
                    now_ms
                ],
            )
            .await?;

        Ok(ApplyOutcome {
            duplicate: false,
            stale,
            entity,
        })
    }
}

impl EntityRepository for LibSqlEntityRepository<'_> {
    async fn get(&self, id: &EntityId) -> Result<Option<StoredEntity>> {
        let mut rows = self
            .conn
            .query(
                "SELECT owner_id, body FROM remote_entities WHERE id = ?",
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => {
                let owner_id: String = row.get(0)?;
                let body: String = row.get(1)?;
                Ok(Some(StoredEntity {
                    owner_id,
                    entity: serde_json::from_str(&body)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn apply_operation(
        &self,
        user_id: &str,
        operation: &SyncOperation,
        now_ms: i64,
    ) -> Result<ApplyOutcome> {
        let incoming = operation.payload_entity()?;

        self.conn.execute("BEGIN IMMEDIATE", ()).await?;
        match self
            .apply_in_transaction(user_id, operation, incoming, now_ms)
            .await
        {
            Ok(outcome) => {
                if let Err(e) = self.conn.execute("COMMIT", ()).await {
                    self.conn.execute("ROLLBACK", ()).await.ok();
                    return Err(e.into());
                }
                Ok(outcome)
            }
            Err(e) => {
                self.conn.execute("ROLLBACK", ()).await.ok();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::EntityKind;
    use serde_json::{json, Map};

    async fn setup() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    fn task(title: &str) -> Entity {
        let mut fields = Map::new();
        fields.insert("title".to_string(), json!(title));
        Entity::new(EntityKind::Task, fields)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_apply_create_then_get() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        let entity = task("Plan sprint");
        let op = SyncOperation::for_entity(OperationKind::Create, &entity).unwrap();
        let outcome = repo.apply_operation("user-1", &op, 1).await.unwrap();
        assert!(!outcome.duplicate);
        assert!(!outcome.stale);

        let stored = repo.get(&entity.id).await.unwrap().unwrap();
        assert_eq!(stored.owner_id, "user-1");
        assert_eq!(stored.entity, entity);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_redelivery_has_single_effect() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        let mut entity = task("v1");
        let create = SyncOperation::for_entity(OperationKind::Create, &entity).unwrap();
        repo.apply_operation("user-1", &create, 1).await.unwrap();

        entity.apply_changes(
            json!({"title": "v2"}).as_object().cloned().unwrap(),
            entity.updated_at + 1,
        );
        let update = SyncOperation::for_entity(OperationKind::Update, &entity).unwrap();
        repo.apply_operation("user-1", &update, 2).await.unwrap();

        // Redelivering the create after the update must not roll the entity back
        let replay = repo.apply_operation("user-1", &create, 3).await.unwrap();
        assert!(replay.duplicate);
        assert_eq!(replay.entity.unwrap().fields["title"], json!("v2"));

        let mut rows = db
            .connection()
            .query("SELECT COUNT(*) FROM applied_operations", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_delete_marks_entity_deleted() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        let mut entity = task("temp");
        let create = SyncOperation::for_entity(OperationKind::Create, &entity).unwrap();
        repo.apply_operation("user-1", &create, 1).await.unwrap();

        entity.mark_deleted(entity.updated_at + 5);
        let delete = SyncOperation::for_entity(OperationKind::Delete, &entity).unwrap();
        repo.apply_operation("user-1", &delete, 2).await.unwrap();

        let stored = repo.get(&entity.id).await.unwrap().unwrap();
        assert!(stored.entity.is_deleted);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stale_write_is_ignored_and_logged() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        let mut newer = task("newer");
        newer.updated_at = 2_000;
        let mut older = newer.clone();
        older.updated_at = 1_000;
        older.fields.insert("title".to_string(), json!("older"));

        let first = SyncOperation::for_entity(OperationKind::Update, &newer).unwrap();
        repo.apply_operation("user-1", &first, 1).await.unwrap();
        let second = SyncOperation::for_entity(OperationKind::Update, &older).unwrap();
        let outcome = repo.apply_operation("user-1", &second, 2).await.unwrap();

        assert!(outcome.stale);
        assert_eq!(outcome.entity.unwrap().fields["title"], json!("newer"));

        let conflicts = LibSqlConflictRepository::new(db.connection())
            .list(10)
            .await
            .unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].winner, ConflictWinner::Local);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_other_users_entity_is_forbidden() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        let mut entity = task("mine");
        let create = SyncOperation::for_entity(OperationKind::Create, &entity).unwrap();
        repo.apply_operation("user-1", &create, 1).await.unwrap();

        entity.touch(entity.updated_at + 1);
        let update = SyncOperation::for_entity(OperationKind::Update, &entity).unwrap();
        let err = repo
            .apply_operation("user-2", &update, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        // Rolled back: the operation was not recorded as applied
        let retry = repo.apply_operation("user-1", &update, 3).await.unwrap();
        assert!(!retry.duplicate);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_replayed_operation_from_other_user_is_forbidden() {
        let db = setup().await;
        let repo = LibSqlEntityRepository::new(db.connection());

        let entity = task("secret plan");
        let create = SyncOperation::for_entity(OperationKind::Create, &entity).unwrap();
        repo.apply_operation("user-1", &create, 1).await.unwrap();

        let err = repo
            .apply_operation("user-2", &create, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let replay = repo.apply_operation("user-1", &create, 3).await.unwrap();
        assert!(replay.duplicate);
    }
}
