//! Sync operation model

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::entity::{Entity, EntityKind, EntityRef};
use super::uuid_id;

uuid_id!(
    /// A unique identifier for a queued operation, used by the remote for deduplication
    OperationId
);

/// Kind of mutation carried by a sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    SaveWorkspace,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::SaveWorkspace => "save-workspace",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pending mutation awaiting delivery to the remote system.
///
/// Never mutated after creation; it only leaves the queue once the remote
/// acknowledges it (or the user discards it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique operation identifier
    pub id: OperationId,
    /// Operation type
    pub kind: OperationKind,
    /// Target entity
    pub entity: EntityRef,
    /// Operation payload (the entity copy for entity mutations)
    pub payload: Value,
    /// Enqueue timestamp (Unix ms)
    pub enqueued_at: i64,
}

impl SyncOperation {
    /// Build an operation that carries a full copy of `entity`
    pub fn for_entity(kind: OperationKind, entity: &Entity) -> Result<Self> {
        if kind == OperationKind::SaveWorkspace && entity.kind != EntityKind::Workspace {
            return Err(Error::InvalidInput(format!(
                "save-workspace requires a workspace, got {}",
                entity.kind
            )));
        }
        if kind == OperationKind::Delete && !entity.is_deleted {
            return Err(Error::InvalidInput(
                "delete operation requires an entity marked deleted".to_string(),
            ));
        }

        Ok(Self {
            id: OperationId::new(),
            kind,
            entity: entity.reference(),
            payload: serde_json::to_value(entity)?,
            enqueued_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Decode the payload back into the entity copy it carries
    pub fn payload_entity(&self) -> Result<Entity> {
        let entity: Entity = serde_json::from_value(self.payload.clone())?;
        if entity.reference() != self.entity {
            return Err(Error::InvalidInput(format!(
                "payload entity {} does not match operation target {}",
                entity.reference(),
                self.entity
            )));
        }
        Ok(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn test_operation_kind_wire_names() {
        assert_eq!(
            serde_json::to_value(OperationKind::SaveWorkspace).unwrap(),
            json!("save-workspace")
        );
        assert_eq!(
            serde_json::from_value::<OperationKind>(json!("delete")).unwrap(),
            OperationKind::Delete
        );
    }

    #[test]
    fn test_for_entity_carries_payload() {
        let entity = Entity::new(EntityKind::Task, Map::new());
        let op = SyncOperation::for_entity(OperationKind::Create, &entity).unwrap();
        assert_eq!(op.entity, entity.reference());
        assert_eq!(op.payload_entity().unwrap(), entity);
    }

    #[test]
    fn test_save_workspace_rejects_other_kinds() {
        let task = Entity::new(EntityKind::Task, Map::new());
        assert!(SyncOperation::for_entity(OperationKind::SaveWorkspace, &task).is_err());
    }

    #[test]
    fn test_delete_requires_deleted_entity() {
        let mut task = Entity::new(EntityKind::Task, Map::new());
        assert!(SyncOperation::for_entity(OperationKind::Delete, &task).is_err());
        task.mark_deleted(task.updated_at + 1);
        assert!(SyncOperation::for_entity(OperationKind::Delete, &task).is_ok());
    }
}
