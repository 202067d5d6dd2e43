//! Sync conflict model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Side that survived a last-writer-wins resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictWinner {
    Local,
    Remote,
}

impl ConflictWinner {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for ConflictWinner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictWinner {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            other => Err(Error::InvalidInput(format!("unknown conflict winner '{other}'"))),
        }
    }
}

/// Recorded sync conflict resolved by strategy (e.g., LWW)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict row identifier
    pub id: i64,
    /// Entity involved in the conflict
    pub entity_id: String,
    /// Existing copy's timestamp when the conflict occurred
    pub local_updated_at: i64,
    /// Incoming copy's timestamp
    pub incoming_updated_at: i64,
    /// Resolution timestamp (unix ms)
    pub resolved_at: i64,
    /// Resolution strategy name
    pub strategy: String,
    /// Which copy was kept
    pub winner: ConflictWinner,
}
