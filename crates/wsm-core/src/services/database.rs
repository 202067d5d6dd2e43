//! Shared database service wrapper used by the CLI and the API server.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{
    ApplyOutcome, Database, EntityRepository, KeyValueRepository, LibSqlConflictRepository,
    LibSqlEntityRepository, LibSqlKeyValueRepository, LibSqlSessionRepository, NewConflict,
    SessionRepository, StoredEntity,
};
use crate::models::{EntityId, Session, SessionId, SyncConflict, SyncOperation};
use crate::Result;

/// Run a repository call, reopening the database once if the file turned out
/// to be corrupted and the service was opened with recovery enabled.
macro_rules! with_recovery {
    ($self:ident, $repo:ident, |$r:ident| $call:expr) => {{
        let first_attempt = {
            let db = $self.db.lock().await;
            let $r = $repo::new(db.connection());
            $call.await
        };

        match first_attempt {
            Err(error) if Self::is_corrupted_db_error(&error) => {
                if $self.reopen_after_corruption().await? {
                    let db = $self.db.lock().await;
                    let $r = $repo::new(db.connection());
                    $call.await
                } else {
                    Err(error)
                }
            }
            other => other,
        }
    }};
}

/// Thread-safe service for DB and repository operations.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    recover_corrupted: bool,
}

impl DatabaseService {
    /// Open a database service at the given filesystem path.
    ///
    /// An unreadable file is an error. Used for the server's authoritative
    /// database, where starting empty would lose applied operations.
    pub async fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(db_path.into(), false).await
    }

    /// Open a client-side database, moving an unreadable file aside and
    /// starting fresh instead of failing.
    pub async fn open_recoverable(db_path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with(db_path.into(), true).await
    }

    async fn open_with(db_path: PathBuf, recover_corrupted: bool) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = if recover_corrupted {
            Self::open_database(&db_path).await?
        } else {
            Database::open(&db_path).await?
        };
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            recover_corrupted,
        })
    }

    /// Open an in-memory database service (primarily for tests).
    pub async fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory().await?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: None,
            recover_corrupted: false,
        })
    }

    /// Path of the backing file, `None` when in memory.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    async fn open_database(db_path: &Path) -> Result<Database> {
        match Database::open(db_path).await {
            Ok(db) => Ok(db),
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Database at {} is not readable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_files(db_path)?;
                Database::open(db_path).await
            }
            Err(error) => Err(error),
        }
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database")
            || message.contains("database disk image is malformed")
    }

    /// Move the database file and its `-wal`/`-shm` sidecars aside under a
    /// common `.corrupt-{timestamp}` suffix, so nothing committed is deleted.
    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        let suffix = format!(".corrupt-{}", chrono::Utc::now().timestamp_millis());

        for sidecar in ["", "-wal", "-shm"] {
            let path = db_path.with_file_name(format!("{base_name}{sidecar}"));
            if !path.exists() {
                continue;
            }
            let backup_path = db_path.with_file_name(format!("{base_name}{sidecar}{suffix}"));
            std::fs::rename(&path, &backup_path)?;
            tracing::warn!(
                "Moved unreadable local DB file from {} to {}",
                path.display(),
                backup_path.display()
            );
        }

        Ok(())
    }

    /// Swap in a fresh database after moving the unreadable one aside.
    /// The current connection stays in place unless the reopen succeeds.
    async fn reopen_after_corruption(&self) -> Result<bool> {
        if !self.recover_corrupted {
            return Ok(false);
        }
        let Some(db_path) = self.db_path.as_deref() else {
            return Ok(false);
        };

        tracing::warn!(
            "Detected invalid local DB file; attempting to reopen connection at {}",
            db_path.display()
        );

        let mut db = self.db.lock().await;
        Self::quarantine_corrupted_db_files(db_path)?;
        *db = Database::open(db_path).await?;
        Ok(true)
    }

    // Key-value store

    /// Read the raw value stored under `key`.
    pub async fn kv_get(&self, key: &str) -> Result<Option<String>> {
        with_recovery!(self, LibSqlKeyValueRepository, |repo| repo.get(key))
    }

    /// Insert or replace the raw value stored under `key`.
    pub async fn kv_set(&self, key: &str, value: &str) -> Result<()> {
        with_recovery!(self, LibSqlKeyValueRepository, |repo| repo.set(key, value))
    }

    pub async fn kv_remove(&self, key: &str) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlKeyValueRepository::new(db.connection())
            .remove(key)
            .await
    }

    pub async fn kv_clear(&self) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlKeyValueRepository::new(db.connection()).clear().await
    }

    /// All entries whose key starts with `prefix`, ordered by key.
    pub async fn kv_entries_with_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>> {
        with_recovery!(self, LibSqlKeyValueRepository, |repo| repo
            .entries_with_prefix(prefix))
    }

    // Conflict log

    /// Record a last-writer-wins resolution.
    pub async fn record_conflict(&self, conflict: &NewConflict) -> Result<SyncConflict> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .record(conflict)
            .await
    }

    /// List recently resolved sync conflicts.
    pub async fn list_conflicts(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let db = self.db.lock().await;
        LibSqlConflictRepository::new(db.connection())
            .list(limit)
            .await
    }

    // Authoritative entities (server side)

    pub async fn get_entity(&self, id: &EntityId) -> Result<Option<StoredEntity>> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection()).get(id).await
    }

    /// Apply a sync operation exactly once on behalf of `user_id`.
    pub async fn apply_operation(
        &self,
        user_id: &str,
        operation: &SyncOperation,
        now_ms: i64,
    ) -> Result<ApplyOutcome> {
        let db = self.db.lock().await;
        LibSqlEntityRepository::new(db.connection())
            .apply_operation(user_id, operation, now_ms)
            .await
    }

    // Sessions and user activity (server side)

    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .insert(session)
            .await
    }

    pub async fn update_session(&self, session: &Session) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .update(session)
            .await
    }

    pub async fn get_session(&self, id: &SessionId) -> Result<Option<Session>> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection()).get(id).await
    }

    /// The user's most recently active session that is still active.
    pub async fn find_active_session(&self, user_id: &str) -> Result<Option<Session>> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .find_active_for_user(user_id)
            .await
    }

    /// Record that the user made an authenticated request.
    pub async fn touch_user(&self, user_id: &str, now_ms: i64) -> Result<()> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .touch_user(user_id, now_ms)
            .await
    }

    pub async fn user_last_active(&self, user_id: &str) -> Result<Option<i64>> {
        let db = self.db.lock().await;
        LibSqlSessionRepository::new(db.connection())
            .user_last_active(user_id)
            .await
    }
}
