//! Entity model shared by workspaces, projects, tasks and sessions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Error;

use super::uuid_id;

uuid_id!(
    /// A unique identifier for a synced entity
    EntityId
);

/// Collections that are cached locally and synced to the remote system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Workspace,
    Project,
    Task,
    Session,
}

impl EntityKind {
    pub const ALL: [Self; 4] = [Self::Workspace, Self::Project, Self::Task, Self::Session];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Project => "project",
            Self::Task => "task",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "workspace" => Ok(Self::Workspace),
            "project" => Ok(Self::Project),
            "task" => Ok(Self::Task),
            "session" => Ok(Self::Session),
            other => Err(Error::InvalidInput(format!("unknown entity kind '{other}'"))),
        }
    }
}

/// Reference to the entity an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Latest known copy of an entity.
///
/// Collection-specific fields are carried untouched in `fields` so that a
/// round-trip through the local store and the remote system preserves them
/// field-for-field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Stable identifier
    pub id: EntityId,
    /// Collection the entity belongs to
    pub kind: EntityKind,
    /// Last update timestamp (Unix ms), the last-writer-wins key
    pub updated_at: i64,
    /// Soft delete flag for sync
    #[serde(default)]
    pub is_deleted: bool,
    /// Schema-declared fields of the collection
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl Entity {
    /// Create a new entity stamped with the current time
    #[must_use]
    pub fn new(kind: EntityKind, fields: Map<String, Value>) -> Self {
        Self {
            id: EntityId::new(),
            kind,
            updated_at: chrono::Utc::now().timestamp_millis(),
            is_deleted: false,
            fields,
        }
    }

    pub const fn reference(&self) -> EntityRef {
        EntityRef {
            kind: self.kind,
            id: self.id,
        }
    }

    /// Merge `changes` into the fields and bump `updated_at`.
    ///
    /// A `null` value removes the field.
    pub fn apply_changes(&mut self, changes: Map<String, Value>, now_ms: i64) {
        for (key, value) in changes {
            if value.is_null() {
                self.fields.remove(&key);
            } else {
                self.fields.insert(key, value);
            }
        }
        self.touch(now_ms);
    }

    /// Mark the entity as deleted and bump `updated_at`
    pub fn mark_deleted(&mut self, now_ms: i64) {
        self.is_deleted = true;
        self.touch(now_ms);
    }

    /// Bump `updated_at`, never moving it backwards
    pub fn touch(&mut self, now_ms: i64) {
        self.updated_at = now_ms.max(self.updated_at.saturating_add(1));
    }

    /// Short human-readable label: `title`, then `name`, then the id
    #[must_use]
    pub fn label(&self) -> String {
        ["title", "name"]
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(Value::as_str))
            .map_or_else(|| self.id.to_string(), str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_entity_kind_parse() {
        assert_eq!("Task".parse::<EntityKind>().unwrap(), EntityKind::Task);
        assert_eq!(
            " workspace ".parse::<EntityKind>().unwrap(),
            EntityKind::Workspace
        );
        assert!("note".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_entity_id_parse() {
        let id = EntityId::new();
        let parsed: EntityId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_apply_changes_merges_and_removes_fields() {
        let mut entity = Entity::new(
            EntityKind::Task,
            fields(json!({"title": "Write docs", "priority": "high"})),
        );
        let before = entity.updated_at;

        entity.apply_changes(
            fields(json!({"priority": null, "status": "done"})),
            before + 10,
        );

        assert_eq!(entity.fields.get("title"), Some(&json!("Write docs")));
        assert_eq!(entity.fields.get("status"), Some(&json!("done")));
        assert!(!entity.fields.contains_key("priority"));
        assert_eq!(entity.updated_at, before + 10);
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut entity = Entity::new(EntityKind::Project, Map::new());
        let before = entity.updated_at;
        entity.touch(before - 5_000);
        assert_eq!(entity.updated_at, before + 1);
    }

    #[test]
    fn test_unknown_fields_roundtrip_through_json() {
        let entity = Entity::new(
            EntityKind::Workspace,
            fields(json!({"name": "Acme", "members": ["a", "b"], "settings": {"color": 3}})),
        );
        let raw = serde_json::to_string(&entity).unwrap();
        let back: Entity = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, entity);
        assert_eq!(back.label(), "Acme");
    }
}
