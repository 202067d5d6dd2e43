//! Recovery points: named snapshots of application state that can be
//! restored wholesale.
//!
//! Each point's snapshot lives in the local store under
//! `recovery_snapshot:{timestamp_ms}:{id}`; the records themselves are kept
//! as one list. Retention is enforced after every creation.

mod snapshot;

pub use snapshot::{AppSnapshot, StateSource};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{RecoveryPoint, RecoveryPointId, SnapshotKind};
use crate::store::{KvBackend, LocalStore, RECOVERY_POINTS_KEY, RECOVERY_SNAPSHOT_PREFIX};
use crate::util::{one_line_summary, unix_millis_now};
use crate::{Error, Result};

const DAY_MS: i64 = 24 * 60 * 60 * 1_000;

/// How many recovery points survive pruning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    pub max_points: usize,
    pub max_age_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_points: 20,
            max_age_days: 7,
        }
    }
}

pub struct RecoveryPointStore<B> {
    store: LocalStore<B>,
    retention: RetentionPolicy,
}

impl<B: KvBackend> RecoveryPointStore<B> {
    pub const fn new(store: LocalStore<B>, retention: RetentionPolicy) -> Self {
        Self { store, retention }
    }

    /// Recovery points, newest first.
    pub async fn list(&self) -> Vec<RecoveryPoint> {
        let mut points: Vec<RecoveryPoint> = self.store.get(RECOVERY_POINTS_KEY, Vec::new()).await;
        points.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        points
    }

    pub async fn get(&self, id: &RecoveryPointId) -> Option<RecoveryPoint> {
        self.list().await.into_iter().find(|point| point.id == *id)
    }

    /// Snapshot `source` and record a new recovery point.
    pub async fn create<S: StateSource>(
        &self,
        source: &S,
        description: &str,
        kind: SnapshotKind,
        context: Option<Value>,
    ) -> Result<RecoveryPointId> {
        self.create_at(source, description, kind, context, unix_millis_now())
            .await
    }

    async fn create_at<S: StateSource>(
        &self,
        source: &S,
        description: &str,
        kind: SnapshotKind,
        context: Option<Value>,
        now_ms: i64,
    ) -> Result<RecoveryPointId> {
        let description = description.trim();
        if description.is_empty() {
            return Err(Error::InvalidInput(
                "recovery point description cannot be empty".to_string(),
            ));
        }

        let snapshot = source.capture().await?;
        let id = RecoveryPointId::new();
        let snapshot_key = format!("{RECOVERY_SNAPSHOT_PREFIX}{now_ms}:{id}");
        self.store.set(&snapshot_key, &snapshot).await?;

        let mut points = self.list().await;
        points.push(RecoveryPoint {
            id,
            created_at: now_ms,
            description: description.to_string(),
            snapshot_key,
            kind,
            context,
        });
        self.store.set(RECOVERY_POINTS_KEY, &points).await?;

        tracing::info!(
            recovery_point = %id,
            kind = %kind,
            entities = snapshot.entities.len(),
            pending = snapshot.queue.len(),
            "Created recovery point"
        );

        self.prune_at(now_ms).await?;
        Ok(id)
    }

    /// Replace the state of `source` with the snapshot of recovery point `id`.
    pub async fn restore<S: StateSource>(
        &self,
        source: &S,
        id: &RecoveryPointId,
    ) -> Result<RecoveryPoint> {
        let point = self
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("recovery point {id}")))?;
        let snapshot: AppSnapshot = self
            .store
            .try_get(&point.snapshot_key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("snapshot for recovery point {id}")))?;

        source.restore(&snapshot).await?;
        tracing::info!(recovery_point = %id, "Restored recovery point");
        Ok(point)
    }

    /// Best-effort capture after an unhandled error; failures are only logged.
    pub async fn capture_on_error<S: StateSource>(
        &self,
        source: &S,
        error: &dyn std::fmt::Display,
    ) -> Option<RecoveryPointId> {
        let message = one_line_summary(&error.to_string());
        let context = serde_json::json!({ "error": message });
        match self
            .create(
                source,
                &format!("Error: {message}"),
                SnapshotKind::ErrorTriggered,
                Some(context),
            )
            .await
        {
            Ok(id) => Some(id),
            Err(capture_error) => {
                tracing::warn!("Failed to capture error recovery point: {}", capture_error);
                None
            }
        }
    }

    async fn prune_at(&self, now_ms: i64) -> Result<usize> {
        let max_age_ms = i64::from(self.retention.max_age_days).saturating_mul(DAY_MS);
        let cutoff = now_ms.saturating_sub(max_age_ms);

        let (kept, dropped): (Vec<_>, Vec<_>) = self
            .list()
            .await
            .into_iter()
            .enumerate()
            .partition(|(index, point)| {
                *index < self.retention.max_points && point.created_at >= cutoff
            });

        if dropped.is_empty() {
            return Ok(0);
        }

        for (_, point) in &dropped {
            if let Err(error) = self.store.remove(&point.snapshot_key).await {
                tracing::warn!("Failed to remove snapshot {}: {}", point.snapshot_key, error);
            }
        }
        let kept: Vec<RecoveryPoint> = kept.into_iter().map(|(_, point)| point).collect();
        self.store.set(RECOVERY_POINTS_KEY, &kept).await?;

        tracing::debug!("Pruned {} recovery point(s)", dropped.len());
        Ok(dropped.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Entity, EntityKind, OperationKind, SyncOperation};
    use crate::store::MemoryBackend;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeState {
        current: Mutex<AppSnapshot>,
        fail_capture: bool,
    }

    impl StateSource for FakeState {
        async fn capture(&self) -> Result<AppSnapshot> {
            if self.fail_capture {
                return Err(Error::Database("disk full".to_string()));
            }
            Ok(self.current.lock().await.clone())
        }

        async fn restore(&self, snapshot: &AppSnapshot) -> Result<()> {
            *self.current.lock().await = snapshot.clone();
            Ok(())
        }
    }

    fn sample_snapshot() -> AppSnapshot {
        let mut fields = Map::new();
        fields.insert("name".to_string(), json!("Roadmap"));
        let project = Entity::new(EntityKind::Project, fields);
        let operation = SyncOperation::for_entity(OperationKind::Create, &project).unwrap();
        AppSnapshot {
            entities: vec![project],
            queue: vec![operation],
        }
    }

    fn store() -> RecoveryPointStore<MemoryBackend> {
        RecoveryPointStore::new(
            LocalStore::new(MemoryBackend::new()),
            RetentionPolicy::default(),
        )
    }

    #[tokio::test]
    async fn restore_returns_captured_state() {
        let points = store();
        let state = FakeState::default();
        *state.current.lock().await = sample_snapshot();

        let id = points
            .create(&state, "Before import", SnapshotKind::Manual, None)
            .await
            .unwrap();
        let captured = state.capture().await.unwrap();

        *state.current.lock().await = AppSnapshot::default();
        let point = points.restore(&state, &id).await.unwrap();

        assert_eq!(point.description, "Before import");
        assert_eq!(point.kind, SnapshotKind::Manual);
        assert!(point
            .snapshot_key
            .starts_with(&format!("{RECOVERY_SNAPSHOT_PREFIX}{}:", point.created_at)));
        assert_eq!(state.capture().await.unwrap(), captured);
    }

    #[tokio::test]
    async fn restore_unknown_or_missing_snapshot_is_not_found() {
        let points = store();
        let state = FakeState::default();
        assert!(matches!(
            points.restore(&state, &RecoveryPointId::new()).await,
            Err(Error::NotFound(_))
        ));

        let id = points
            .create(&state, "Manual", SnapshotKind::Manual, None)
            .await
            .unwrap();
        let point = points.get(&id).await.unwrap();
        points.store.remove(&point.snapshot_key).await.unwrap();
        assert!(matches!(
            points.restore(&state, &id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn retention_drops_oldest_beyond_count() {
        let points = RecoveryPointStore::new(
            LocalStore::new(MemoryBackend::new()),
            RetentionPolicy {
                max_points: 3,
                max_age_days: 7,
            },
        );
        let state = FakeState::default();
        let base = 1_700_000_000_000;

        let mut ids = Vec::new();
        for offset in 0..5 {
            let id = points
                .create_at(
                    &state,
                    &format!("point {offset}"),
                    SnapshotKind::Automatic,
                    None,
                    base + offset,
                )
                .await
                .unwrap();
            ids.push(id);
        }

        let listed: Vec<_> = points.list().await.into_iter().map(|p| p.id).collect();
        assert_eq!(listed, vec![ids[4], ids[3], ids[2]]);

        let snapshots = points
            .store
            .backend()
            .entries_with_prefix(RECOVERY_SNAPSHOT_PREFIX)
            .await
            .unwrap();
        assert_eq!(snapshots.len(), 3);
    }

    #[tokio::test]
    async fn retention_drops_points_older_than_max_age() {
        let points = store();
        let state = FakeState::default();
        let now = 1_700_000_000_000;

        points
            .create_at(&state, "old", SnapshotKind::Automatic, None, now - 8 * DAY_MS)
            .await
            .unwrap();
        let recent = points
            .create_at(&state, "recent", SnapshotKind::Automatic, None, now)
            .await
            .unwrap();

        let listed: Vec<_> = points.list().await.into_iter().map(|p| p.id).collect();
        assert_eq!(listed, vec![recent]);
    }

    #[tokio::test]
    async fn capture_on_error_is_best_effort() {
        let points = store();
        let state = FakeState::default();

        let id = points
            .capture_on_error(&state, &"queue write failed")
            .await
            .unwrap();
        let point = points.get(&id).await.unwrap();
        assert_eq!(point.kind, SnapshotKind::ErrorTriggered);
        assert_eq!(point.context, Some(json!({"error": "queue write failed"})));

        let broken = FakeState {
            fail_capture: true,
            ..FakeState::default()
        };
        assert_eq!(points.capture_on_error(&broken, &"boom").await, None);
    }

    #[tokio::test]
    async fn empty_description_is_rejected() {
        let points = store();
        let state = FakeState::default();
        assert!(matches!(
            points
                .create(&state, "  ", SnapshotKind::Manual, None)
                .await,
            Err(Error::InvalidInput(_))
        ));
    }
}
