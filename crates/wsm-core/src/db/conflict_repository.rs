//! Sync conflict log repository

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::Result;
use crate::models::{ConflictWinner, SyncConflict};
use libsql::{params, Connection};

/// A conflict about to be recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConflict {
    pub entity_id: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub winner: ConflictWinner,
}

/// libSQL store for resolved sync conflicts
pub struct LibSqlConflictRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlConflictRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Record a last-writer-wins resolution
    pub async fn record(&self, conflict: &NewConflict) -> Result<SyncConflict> {
        let resolved_at = chrono::Utc::now().timestamp_millis();
        self.conn
            .execute(
                "INSERT INTO sync_conflicts (
                    entity_id, local_updated_at, incoming_updated_at, resolved_at, strategy, winner
                 ) VALUES (?, ?, ?, ?, 'lww', ?)",
                params![
                    conflict.entity_id.as_str(),
                    conflict.local_updated_at,
                    conflict.incoming_updated_at,
                    resolved_at,
                    conflict.winner.as_str()
                ],
            )
            .await?;

        Ok(SyncConflict {
            id: self.conn.last_insert_rowid(),
            entity_id: conflict.entity_id.clone(),
            local_updated_at: conflict.local_updated_at,
            incoming_updated_at: conflict.incoming_updated_at,
            resolved_at,
            strategy: "lww".to_string(),
            winner: conflict.winner,
        })
    }

    /// List recently resolved conflicts, newest first
    pub async fn list(&self, limit: usize) -> Result<Vec<SyncConflict>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity_id, local_updated_at, incoming_updated_at, resolved_at, strategy, winner
                 FROM sync_conflicts
                 ORDER BY resolved_at DESC, id DESC
                 LIMIT ?",
                [limit as i64],
            )
            .await?;

        let mut conflicts = Vec::new();
        while let Some(row) = rows.next().await? {
            conflicts.push(SyncConflict {
                id: row.get(0)?,
                entity_id: row.get(1)?,
                local_updated_at: row.get(2)?,
                incoming_updated_at: row.get(3)?,
                resolved_at: row.get(4)?,
                strategy: row.get(5)?,
                winner: row.get::<String>(6)?.parse()?,
            });
        }
        Ok(conflicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_record_and_list() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = LibSqlConflictRepository::new(db.connection());

        repo.record(&NewConflict {
            entity_id: "e1".to_string(),
            local_updated_at: 10,
            incoming_updated_at: 20,
            winner: ConflictWinner::Remote,
        })
        .await
        .unwrap();
        let second = repo
            .record(&NewConflict {
                entity_id: "e2".to_string(),
                local_updated_at: 30,
                incoming_updated_at: 5,
                winner: ConflictWinner::Local,
            })
            .await
            .unwrap();

        let conflicts = repo.list(10).await.unwrap();
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0], second);
        assert_eq!(conflicts[1].winner, ConflictWinner::Remote);

        assert_eq!(repo.list(1).await.unwrap().len(), 1);
    }
}
