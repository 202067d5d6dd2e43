//! Session and user activity repository (server side)

use crate::error::{Error, Result};
use crate::models::{Session, SessionId, SessionStatus};
use libsql::{params, Connection, Row};

/// Trait for session storage operations (async)
#[allow(async_fn_in_trait)]
pub trait SessionRepository {
    /// Insert a new session
    async fn insert(&self, session: &Session) -> Result<()>;

    /// Persist every mutable column of an existing session
    async fn update(&self, session: &Session) -> Result<()>;

    /// Get a session by ID
    async fn get(&self, id: &SessionId) -> Result<Option<Session>>;

    /// The user's active session, most recently active first
    async fn find_active_for_user(&self, user_id: &str) -> Result<Option<Session>>;

    /// Upsert the user's last-active timestamp
    async fn touch_user(&self, user_id: &str, now_ms: i64) -> Result<()>;

    /// The user's last-active timestamp, if the user was ever seen
    async fn user_last_active(&self, user_id: &str) -> Result<Option<i64>>;
}

/// libSQL implementation of `SessionRepository`
pub struct LibSqlSessionRepository<'a> {
    conn: &'a Connection,
}

impl<'a> LibSqlSessionRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_session(row: &Row) -> Result<Session> {
        let id: String = row.get(0)?;
        let status: String = row.get(5)?;
        let context: String = row.get(10)?;
        Ok(Session {
            id: id
                .parse()
                .map_err(|_| Error::Database(format!("invalid session id '{id}'")))?,
            user_id: row.get(1)?,
            workspace_id: row.get(2)?,
            project_id: row.get(3)?,
            task_id: row.get(4)?,
            status: status.parse::<SessionStatus>()?,
            started_at: row.get(6)?,
            last_active: row.get(7)?,
            completed_at: row.get(8)?,
            duration_minutes: row.get(9)?,
            context: serde_json::from_str(&context)?,
        })
    }
}

const SESSION_COLUMNS: &str = "id, user_id, workspace_id, project_id, task_id, status, \
     started_at, last_active, completed_at, duration_minutes, context";

impl SessionRepository for LibSqlSessionRepository<'_> {
    async fn insert(&self, session: &Session) -> Result<()> {
        let context = serde_json::to_string(&session.context)?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO sessions ({SESSION_COLUMNS})
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
                ),
                params![
                    session.id.as_str(),
                    session.user_id.as_str(),
                    session.workspace_id.clone(),
                    session.project_id.clone(),
                    session.task_id.clone(),
                    session.status.as_str(),
                    session.started_at,
                    session.last_active,
                    session.completed_at,
                    session.duration_minutes,
                    context
                ],
            )
            .await?;
        Ok(())
    }

    async fn update(&self, session: &Session) -> Result<()> {
        let context = serde_json::to_string(&session.context)?;
        let rows = self
            .conn
            .execute(
                "UPDATE sessions
                 SET workspace_id = ?, project_id = ?, task_id = ?, status = ?,
                     last_active = ?, completed_at = ?, duration_minutes = ?, context = ?
                 WHERE id = ?",
                params![
                    session.workspace_id.clone(),
                    session.project_id.clone(),
                    session.task_id.clone(),
                    session.status.as_str(),
                    session.last_active,
                    session.completed_at,
                    session.duration_minutes,
                    context,
                    session.id.as_str()
                ],
            )
            .await?;

        if rows == 0 {
            return Err(Error::NotFound(format!("session {}", session.id)));
        }
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> Result<Option<Session>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"),
                [id.as_str()],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_session(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_active_for_user(&self, user_id: &str) -> Result<Option<Session>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE user_id = ? AND status = 'active'
                     ORDER BY last_active DESC
                     LIMIT 1"
                ),
                [user_id],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_session(&row)?)),
            None => Ok(None),
        }
    }

    async fn touch_user(&self, user_id: &str, now_ms: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO users (id, last_active) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET last_active = excluded.last_active",
                params![user_id, now_ms],
            )
            .await?;
        Ok(())
    }

    async fn user_last_active(&self, user_id: &str) -> Result<Option<i64>> {
        let mut rows = self
            .conn
            .query("SELECT last_active FROM users WHERE id = ?", [user_id])
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }
}
