//! Recovery point model

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::uuid_id;

uuid_id!(
    /// A unique identifier for a recovery point
    RecoveryPointId
);

/// What triggered a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SnapshotKind {
    /// Timer or shutdown
    Automatic,
    /// Explicit user request
    Manual,
    /// Captured from the top-level error handler
    ErrorTriggered,
}

impl SnapshotKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
            Self::ErrorTriggered => "error-triggered",
        }
    }
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, timestamped reference to a stored state snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPoint {
    pub id: RecoveryPointId,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    pub description: String,
    /// Local store key of the serialized snapshot
    pub snapshot_key: String,
    pub kind: SnapshotKind,
    /// Free-form operation context supplied by the caller
    #[serde(default)]
    pub context: Option<Value>,
}
