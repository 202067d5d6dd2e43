use serde::{Deserialize, Serialize};

use crate::models::{Entity, SyncOperation};
use crate::Result;

/// Everything a recovery point captures: cached entity copies and the
/// pending sync queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppSnapshot {
    pub entities: Vec<Entity>,
    pub queue: Vec<SyncOperation>,
}

/// Application state that can be captured and restored wholesale.
#[allow(async_fn_in_trait)]
pub trait StateSource {
    async fn capture(&self) -> Result<AppSnapshot>;

    /// Replace the current state with `snapshot`.
    async fn restore(&self, snapshot: &AppSnapshot) -> Result<()>;
}
