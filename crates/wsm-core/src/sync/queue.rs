//! Durable FIFO of pending sync operations

use std::collections::VecDeque;

use crate::models::{OperationId, SyncOperation};
use crate::store::{KvBackend, LocalStore, SYNC_QUEUE_KEY};

/// In-memory queue mirrored to the local store after every mutation.
///
/// The in-memory copy stays authoritative for the process lifetime when a
/// write to the store fails.
#[derive(Debug)]
pub struct SyncQueue<B> {
    store: LocalStore<B>,
    operations: VecDeque<SyncOperation>,
}

impl<B: KvBackend> SyncQueue<B> {
    /// Load the persisted queue; an unreadable queue starts empty.
    pub async fn load(store: LocalStore<B>) -> Self {
        let operations: VecDeque<SyncOperation> = store.get(SYNC_QUEUE_KEY, VecDeque::new()).await;
        if !operations.is_empty() {
            tracing::info!("Loaded {} pending sync operation(s)", operations.len());
        }
        Self { store, operations }
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn head(&self) -> Option<&SyncOperation> {
        self.operations.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SyncOperation> {
        self.operations.iter()
    }

    pub async fn enqueue(&mut self, operation: SyncOperation) {
        tracing::debug!(
            operation = %operation.id,
            kind = %operation.kind,
            entity = %operation.entity,
            "Enqueued sync operation"
        );
        self.operations.push_back(operation);
        self.persist().await;
    }

    /// Remove the head, but only if it is still `id`.
    pub async fn remove_head(&mut self, id: &OperationId) -> Option<SyncOperation> {
        if self.operations.front().map(|op| &op.id) != Some(id) {
            return None;
        }
        let removed = self.operations.pop_front();
        self.persist().await;
        removed
    }

    /// Replace the whole queue (recovery restore).
    pub async fn replace(&mut self, operations: impl IntoIterator<Item = SyncOperation>) {
        self.operations = operations.into_iter().collect();
        self.persist().await;
    }

    async fn persist(&self) {
        if self.store.set(SYNC_QUEUE_KEY, &self.operations).await.is_err() {
            tracing::warn!(
                "Keeping {} sync operation(s) in memory only until the next successful write",
                self.operations.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, EntityKind, OperationKind};
    use crate::store::MemoryBackend;
    use serde_json::Map;

    fn op() -> SyncOperation {
        let entity = Entity::new(EntityKind::Task, Map::new());
        SyncOperation::for_entity(OperationKind::Create, &entity).unwrap()
    }

    #[tokio::test]
    async fn queue_survives_reload() {
        let store = LocalStore::new(MemoryBackend::new());
        let mut queue = SyncQueue::load(store.clone()).await;
        let first = op();
        let second = op();
        queue.enqueue(first.clone()).await;
        queue.enqueue(second.clone()).await;

        let reloaded = SyncQueue::load(store).await;
        let ids: Vec<_> = reloaded.iter().map(|op| op.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn remove_head_only_removes_matching_head() {
        let store = LocalStore::new(MemoryBackend::new());
        let mut queue = SyncQueue::load(store).await;
        let first = op();
        let second = op();
        queue.enqueue(first.clone()).await;
        queue.enqueue(second.clone()).await;

        assert!(queue.remove_head(&second.id).await.is_none());
        assert_eq!(queue.remove_head(&first.id).await, Some(first));
        assert_eq!(queue.head(), Some(&second));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn unreadable_queue_starts_empty() {
        let backend = MemoryBackend::new();
        backend.set_raw(SYNC_QUEUE_KEY, "[{\"bad\":").await.unwrap();

        let queue = SyncQueue::load(LocalStore::new(backend)).await;
        assert!(queue.is_empty());
    }
}
