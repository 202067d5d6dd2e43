//! Dead-letter model

use serde::{Deserialize, Serialize};

use super::sync_operation::SyncOperation;

/// An operation the user discarded from the head of the sync queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub operation: SyncOperation,
    /// Delivery attempts made before the discard
    pub attempts: u32,
    /// Last error reported by the remote, if any
    pub last_error: Option<String>,
    /// Discard timestamp (Unix ms)
    pub discarded_at: i64,
}
