//! Sync queue and engine.
//!
//! Local mutations are written to the local store, queued as
//! [`SyncOperation`](crate::models::SyncOperation)s and delivered head-first,
//! one at a time, whenever the engine is online. Reads reconcile the local
//! and remote copies with last-writer-wins on `updated_at`.

mod conflict;
mod engine;
mod queue;
mod retry;

pub use conflict::{resolve, ConflictLog, MemoryConflictLog, Resolution};
pub use engine::{
    DeliveryState, DrainReport, DrainStop, MutationOutcome, StuckOperation, SyncEngine,
};
pub use queue::SyncQueue;
pub use retry::RetryPolicy;
