//! Database migrations
//!
//! One schema serves both roles: the client uses `kv_store` and
//! `sync_conflicts`, the API server uses the remaining tables.

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 3;

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }
    if version < 3 {
        migrate_v3(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

/// Migration to version 1: local key-value store
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        // JSON text values keyed by string
        "CREATE TABLE IF NOT EXISTS kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "INSERT INTO schema_version (version) VALUES (1)",
    ];

    run_in_transaction(conn, &statements).await?;
    tracing::info!("Migrated database to version 1");
    Ok(())
}

/// Migration to version 2: LWW conflict logging support
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            local_updated_at INTEGER NOT NULL,
            incoming_updated_at INTEGER NOT NULL,
            resolved_at INTEGER NOT NULL,
            strategy TEXT NOT NULL,
            winner TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity_id ON sync_conflicts(entity_id)",
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)",
        "INSERT INTO schema_version (version) VALUES (2)",
    ];

    run_in_transaction(conn, &statements).await?;
    tracing::info!("Migrated database to version 2");
    Ok(())
}

/// Migration to version 3: server-side entities, applied operations, users and sessions
async fn migrate_v3(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS remote_entities (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            updated_at INTEGER NOT NULL,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            body TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_remote_entities_owner ON remote_entities(owner_id)",
        // Writers outside the sync endpoint must not overwrite a newer copy
        "CREATE TRIGGER IF NOT EXISTS remote_entities_lww_guard BEFORE UPDATE ON remote_entities
         FOR EACH ROW
         WHEN NEW.updated_at < OLD.updated_at
         BEGIN
             INSERT INTO sync_conflicts (
                 entity_id,
                 local_updated_at,
                 incoming_updated_at,
                 resolved_at,
                 strategy,
                 winner
             ) VALUES (
                 OLD.id,
                 OLD.updated_at,
                 NEW.updated_at,
                 CAST(strftime('%s','now') AS INTEGER) * 1000,
                 'lww',
                 'local'
             );
             SELECT RAISE(IGNORE);
         END",
        "CREATE TABLE IF NOT EXISTS applied_operations (
            operation_id TEXT PRIMARY KEY,
            entity_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY,
            last_active INTEGER NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            workspace_id TEXT,
            project_id TEXT,
            task_id TEXT,
            status TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            last_active INTEGER NOT NULL,
            completed_at INTEGER,
            duration_minutes INTEGER,
            context TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_sessions_user_status ON sessions(user_id, status)",
        "INSERT INTO schema_version (version) VALUES (3)",
    ];

    run_in_transaction(conn, &statements).await?;
    tracing::info!("Migrated database to version {CURRENT_VERSION}");
    Ok(())
}

/// libsql doesn't have `execute_batch`, so each statement runs separately
/// inside one transaction.
async fn run_in_transaction(conn: &Connection, statements: &[&str]) -> Result<()> {
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt, ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    async fn setup() -> Connection {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        db.connect().unwrap()
    }

    async fn table_exists(conn: &Connection, name: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT EXISTS(
                    SELECT 1 FROM sqlite_master
                    WHERE type = 'table' AND name = ?
                )",
                [name],
            )
            .await
            .unwrap();

        rows.next()
            .await
            .unwrap()
            .is_some_and(|row| row.get::<i32>(0).unwrap() != 0)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migrations_idempotent() {
        let conn = setup().await;
        run(&conn).await.unwrap();
        run(&conn).await.unwrap(); // Should not fail

        let version = get_version(&conn).await.unwrap();
        assert_eq!(version, CURRENT_VERSION);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_migration_creates_client_and_server_tables() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        for table in [
            "kv_store",
            "sync_conflicts",
            "remote_entities",
            "applied_operations",
            "users",
            "sessions",
        ] {
            assert!(table_exists(&conn, table).await, "missing table {table}");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lww_guard_ignores_stale_update() {
        let conn = setup().await;
        run(&conn).await.unwrap();

        conn.execute(
            "INSERT INTO remote_entities (id, kind, owner_id, updated_at, is_deleted, body)
             VALUES ('e1', 'task', 'u1', 200, 0, '{}')",
            (),
        )
        .await
        .unwrap();
        conn.execute(
            "UPDATE remote_entities SET updated_at = 100, body = '{\"stale\":true}' WHERE id = 'e1'",
            (),
        )
        .await
        .unwrap();

        let mut rows = conn
            .query("SELECT updated_at, body FROM remote_entities WHERE id = 'e1'", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 200);
        assert_eq!(row.get::<String>(1).unwrap(), "{}");

        let mut rows = conn
            .query("SELECT COUNT(*) FROM sync_conflicts WHERE entity_id = 'e1'", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 1);
    }
}
