//! Sync engine: drains the queue against the remote system and reconciles
//! reads with last-writer-wins.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::models::{
    DeadLetter, Entity, EntityId, EntityKind, OperationId, OperationKind, SyncConflict,
    SyncOperation,
};
use crate::recovery::{AppSnapshot, StateSource};
use crate::remote::{RemoteError, RemoteStore};
use crate::store::{KvBackend, LocalStore, DEAD_LETTER_KEY, SYNC_DELIVERY_KEY};
use crate::util::{duration_millis, unix_millis_now};
use crate::{Error, Result};

use super::conflict::{resolve, ConflictLog};
use super::queue::SyncQueue;
use super::retry::RetryPolicy;

/// Why a drain stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStop {
    /// Queue is empty
    Empty,
    Offline,
    /// Another drain is running
    AlreadyDraining,
    /// The head operation failed and stays at the head
    Failed,
    /// The head operation is waiting for its next retry slot
    Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub stop: DrainStop,
}

impl DrainReport {
    const fn stopped(delivered: usize, stop: DrainStop) -> Self {
        Self { delivered, stop }
    }
}

/// Retry bookkeeping for the operation at the head of the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryState {
    pub operation_id: OperationId,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// The remote rejected the operation for good
    pub permanent: bool,
    /// Unix ms before which the head is not retried
    pub next_attempt_at: i64,
}

/// Head operation that needs the user's attention
#[derive(Debug, Clone, PartialEq)]
pub struct StuckOperation {
    pub operation: SyncOperation,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub permanent: bool,
}

/// Result of a local mutation
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
    pub entity: Entity,
    pub operation_id: OperationId,
    pub drain: DrainReport,
}

struct Inner<B> {
    queue: SyncQueue<B>,
    delivery: Option<DeliveryState>,
}

/// Resets the draining flag when a drain finishes, whichever way it exits.
struct DrainingGuard<'a>(&'a AtomicBool);

impl Drop for DrainingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SyncEngine<B, R> {
    store: LocalStore<B>,
    remote: R,
    policy: RetryPolicy,
    inner: Mutex<Inner<B>>,
    online: AtomicBool,
    draining: AtomicBool,
}

impl<B, R> SyncEngine<B, R>
where
    B: KvBackend + ConflictLog + Clone,
    R: RemoteStore,
{
    /// Load the persisted queue and retry state. Opening never drains.
    pub async fn open(store: LocalStore<B>, remote: R, policy: RetryPolicy, online: bool) -> Self {
        let queue = SyncQueue::load(store.clone()).await;
        let delivery = store
            .get::<Option<DeliveryState>>(SYNC_DELIVERY_KEY, None)
            .await
            .filter(|state| queue.head().is_some_and(|head| head.id == state.operation_id));

        Self {
            store,
            remote,
            policy,
            inner: Mutex::new(Inner { queue, delivery }),
            online: AtomicBool::new(online),
            draining: AtomicBool::new(false),
        }
    }

    pub const fn store(&self) -> &LocalStore<B> {
        &self.store
    }

    pub const fn remote(&self) -> &R {
        &self.remote
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Update connectivity. Coming online resets the backoff wait and drains.
    pub async fn set_online(&self, online: bool) -> Option<DrainReport> {
        let was_online = self.online.swap(online, Ordering::AcqRel);
        match (was_online, online) {
            (false, true) => {
                tracing::info!("Connectivity restored; draining sync queue");
                Some(self.drain_inner(true).await)
            }
            (true, false) => {
                tracing::info!("Connectivity lost; sync suspended");
                None
            }
            _ => None,
        }
    }

    /// Append an operation and drain if online.
    pub async fn enqueue(&self, operation: SyncOperation) -> DrainReport {
        self.inner.lock().await.queue.enqueue(operation).await;
        self.drain().await
    }

    /// Deliver queued operations head-first until the queue empties or a
    /// delivery fails. Respects the backoff wait of a failing head.
    pub async fn drain(&self) -> DrainReport {
        self.drain_inner(false).await
    }

    /// Drain on explicit request, ignoring the backoff wait.
    pub async fn drain_now(&self) -> DrainReport {
        self.drain_inner(true).await
    }

    async fn drain_inner(&self, reset_backoff: bool) -> DrainReport {
        if !self.is_online() {
            return DrainReport::stopped(0, DrainStop::Offline);
        }
        if self.draining.swap(true, Ordering::AcqRel) {
            return DrainReport::stopped(0, DrainStop::AlreadyDraining);
        }
        let _guard = DrainingGuard(&self.draining);

        if reset_backoff {
            self.reset_backoff().await;
        }

        let mut delivered = 0;
        loop {
            if !self.is_online() {
                return DrainReport::stopped(delivered, DrainStop::Offline);
            }

            let head = {
                let inner = self.inner.lock().await;
                let Some(head) = inner.queue.head().cloned() else {
                    return DrainReport::stopped(delivered, DrainStop::Empty);
                };
                if let Some(state) = inner
                    .delivery
                    .as_ref()
                    .filter(|state| state.operation_id == head.id)
                {
                    if state.permanent {
                        tracing::warn!(
                            operation = %head.id,
                            "Head operation was rejected permanently; discard it to continue"
                        );
                        return DrainReport::stopped(delivered, DrainStop::Failed);
                    }
                    if state.next_attempt_at > unix_millis_now() {
                        return DrainReport::stopped(delivered, DrainStop::Backoff);
                    }
                }
                head
            };

            match self.remote.apply(&head).await {
                Ok(ack) => {
                    let more_pending = {
                        let mut inner = self.inner.lock().await;
                        inner.queue.remove_head(&head.id).await;
                        if inner.delivery.take().is_some() {
                            self.store.set(SYNC_DELIVERY_KEY, &inner.delivery).await.ok();
                        }
                        let more = inner.queue.iter().any(|op| op.entity.id == head.entity.id);
                        more
                    };
                    delivered += 1;
                    tracing::debug!(
                        operation = %head.id,
                        entity = %head.entity,
                        duplicate = ack.duplicate,
                        "Delivered sync operation"
                    );
                    if let Some(remote) = ack.entity {
                        let local = self.store.get_entity(&remote.id).await.ok().flatten();
                        // The ack echoes an earlier write of ours; queued edits
                        // for the same entity already moved the local copy on.
                        let superseded = more_pending
                            && local
                                .as_ref()
                                .is_some_and(|local| local.updated_at >= remote.updated_at);
                        if !superseded {
                            self.reconcile(local, Some(remote)).await;
                        }
                    }
                }
                Err(error) => {
                    self.record_failure(&head, &error).await;
                    return DrainReport::stopped(delivered, DrainStop::Failed);
                }
            }
        }
    }

    async fn reset_backoff(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(state) = inner.delivery.as_mut() {
            state.next_attempt_at = 0;
            self.store.set(SYNC_DELIVERY_KEY, &inner.delivery).await.ok();
        }
    }

    async fn record_failure(&self, head: &SyncOperation, error: &RemoteError) {
        let mut inner = self.inner.lock().await;
        if inner.queue.head().map(|op| op.id) != Some(head.id) {
            return;
        }

        let attempts = inner
            .delivery
            .as_ref()
            .filter(|state| state.operation_id == head.id)
            .map_or(1, |state| state.attempts.saturating_add(1));
        let delay = self.policy.delay_for(attempts);
        let delay_ms = duration_millis(delay);

        tracing::warn!(
            operation = %head.id,
            attempts,
            retry_in_ms = delay_ms,
            "Sync delivery failed: {}",
            error
        );

        inner.delivery = Some(DeliveryState {
            operation_id: head.id,
            attempts,
            last_error: Some(error.to_string()),
            permanent: error.is_permanent(),
            next_attempt_at: unix_millis_now().saturating_add(delay_ms),
        });
        self.store.set(SYNC_DELIVERY_KEY, &inner.delivery).await.ok();
    }

    /// Apply last-writer-wins between the two copies, updating the local copy
    /// and the conflict log as needed.
    async fn reconcile(&self, local: Option<Entity>, remote: Option<Entity>) -> Option<Entity> {
        let resolution = resolve(local, remote);

        if resolution.take_remote {
            if let Some(entity) = resolution.entity.as_ref() {
                self.store.put_entity(entity).await.ok();
            }
        }
        if let Some(conflict) = resolution.conflict.as_ref() {
            tracing::info!(
                entity = %conflict.entity_id,
                winner = %conflict.winner,
                "Resolved sync conflict"
            );
            if let Err(error) = self.store.backend().record_conflict(conflict).await {
                tracing::warn!("Failed to record sync conflict: {}", error);
            }
        }

        resolution.entity
    }

    /// Read an entity, preferring a strictly newer remote copy when online.
    pub async fn get_entity(&self, id: &EntityId) -> Result<Option<Entity>> {
        let local = match self.store.get_entity(id).await {
            Ok(local) => local,
            Err(error) => {
                tracing::warn!("Failed to read local copy of {}: {}", id, error);
                None
            }
        };

        if !self.is_online() {
            return Ok(local);
        }

        match self.remote.fetch(id).await {
            Ok(remote) => Ok(self.reconcile(local, remote).await),
            Err(error) => {
                tracing::warn!("Failed to fetch remote copy of {}: {}", id, error);
                Ok(local)
            }
        }
    }

    /// Local copies only, newest first.
    pub async fn list_entities(
        &self,
        kind: Option<EntityKind>,
        include_deleted: bool,
    ) -> Result<Vec<Entity>> {
        let mut entities: Vec<Entity> = self
            .store
            .entities()
            .await?
            .into_iter()
            .filter(|entity| kind.is_none_or(|kind| entity.kind == kind))
            .filter(|entity| include_deleted || !entity.is_deleted)
            .collect();
        entities.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(entities)
    }

    /// Write `entity` to the local store, then queue the operation.
    pub async fn record_mutation(
        &self,
        kind: OperationKind,
        entity: Entity,
    ) -> Result<MutationOutcome> {
        let operation = SyncOperation::for_entity(kind, &entity)?;
        let operation_id = operation.id;

        self.store.put_entity(&entity).await.ok();
        let drain = self.enqueue(operation).await;

        Ok(MutationOutcome {
            entity,
            operation_id,
            drain,
        })
    }

    pub async fn create_entity(
        &self,
        kind: EntityKind,
        fields: Map<String, Value>,
    ) -> Result<MutationOutcome> {
        self.record_mutation(OperationKind::Create, Entity::new(kind, fields))
            .await
    }

    /// Merge `changes` into a live entity; `null` values remove fields.
    pub async fn update_entity(
        &self,
        id: &EntityId,
        changes: Map<String, Value>,
    ) -> Result<MutationOutcome> {
        let mut entity = self.live_entity(id).await?;
        entity.apply_changes(changes, unix_millis_now());
        self.record_mutation(OperationKind::Update, entity).await
    }

    pub async fn delete_entity(&self, id: &EntityId) -> Result<MutationOutcome> {
        let mut entity = self.live_entity(id).await?;
        entity.mark_deleted(unix_millis_now());
        self.record_mutation(OperationKind::Delete, entity).await
    }

    /// Push the full workspace document, optionally merging `changes` first.
    pub async fn save_workspace(
        &self,
        id: &EntityId,
        changes: Map<String, Value>,
    ) -> Result<MutationOutcome> {
        let mut entity = self.live_entity(id).await?;
        entity.apply_changes(changes, unix_millis_now());
        self.record_mutation(OperationKind::SaveWorkspace, entity)
            .await
    }

    async fn live_entity(&self, id: &EntityId) -> Result<Entity> {
        match self.store.get_entity(id).await? {
            Some(entity) if entity.is_deleted => {
                Err(Error::InvalidInput(format!("{} is deleted", entity.reference())))
            }
            Some(entity) => Ok(entity),
            None => Err(Error::NotFound(format!("entity {id}"))),
        }
    }

    /// Pending operations in delivery order.
    pub async fn pending(&self) -> Vec<SyncOperation> {
        self.inner.lock().await.queue.iter().cloned().collect()
    }

    pub async fn delivery_state(&self) -> Option<DeliveryState> {
        self.inner.lock().await.delivery.clone()
    }

    /// The head operation once it was rejected for good or exhausted its
    /// attempt budget.
    pub async fn stuck_operation(&self) -> Option<StuckOperation> {
        let inner = self.inner.lock().await;
        let head = inner.queue.head()?;
        let state = inner
            .delivery
            .as_ref()
            .filter(|state| state.operation_id == head.id)?;

        (state.permanent || self.policy.is_stuck(state.attempts)).then(|| StuckOperation {
            operation: head.clone(),
            attempts: state.attempts,
            last_error: state.last_error.clone(),
            permanent: state.permanent,
        })
    }

    /// Move the head operation to the dead-letter list.
    pub async fn discard_head(&self) -> Result<Option<DeadLetter>> {
        let mut inner = self.inner.lock().await;
        let Some(head_id) = inner.queue.head().map(|op| op.id) else {
            return Ok(None);
        };
        let Some(operation) = inner.queue.remove_head(&head_id).await else {
            return Ok(None);
        };

        let state = inner
            .delivery
            .take()
            .filter(|state| state.operation_id == head_id);
        self.store.set(SYNC_DELIVERY_KEY, &inner.delivery).await.ok();

        let dead_letter = DeadLetter {
            operation,
            attempts: state.as_ref().map_or(0, |state| state.attempts),
            last_error: state.and_then(|state| state.last_error),
            discarded_at: unix_millis_now(),
        };

        let mut dead_letters = self.dead_letters().await;
        dead_letters.push(dead_letter.clone());
        self.store.set(DEAD_LETTER_KEY, &dead_letters).await?;

        tracing::warn!(operation = %head_id, "Discarded head sync operation");
        Ok(Some(dead_letter))
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.store.get(DEAD_LETTER_KEY, Vec::new()).await
    }

    /// Recently resolved conflicts, newest first.
    pub async fn conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        self.store.backend().list_conflicts(limit).await
    }
}

impl<B, R> StateSource for SyncEngine<B, R>
where
    B: KvBackend + ConflictLog + Clone,
    R: RemoteStore,
{
    async fn capture(&self) -> Result<AppSnapshot> {
        let inner = self.inner.lock().await;
        Ok(AppSnapshot {
            entities: self.store.entities().await?,
            queue: inner.queue.iter().cloned().collect(),
        })
    }

    async fn restore(&self, snapshot: &AppSnapshot) -> Result<()> {
        let mut inner = self.inner.lock().await;

        self.store.clear_entities().await?;
        for entity in &snapshot.entities {
            self.store.put_entity(entity).await?;
        }

        inner.queue.replace(snapshot.queue.iter().cloned()).await;
        inner.delivery = None;
        self.store.set(SYNC_DELIVERY_KEY, &inner.delivery).await.ok();

        tracing::info!(
            entities = snapshot.entities.len(),
            pending = snapshot.queue.len(),
            "Restored application state"
        );
        Ok(())
    }
}
