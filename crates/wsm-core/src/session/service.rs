use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Session, SessionId};
use crate::services::DatabaseService;
use crate::{Error, Result};

use super::track_activity;

/// Fields a client may set when starting a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Session lifecycle and activity tracking on top of the database service.
///
/// Every operation that targets a session by id checks ownership first.
#[derive(Clone)]
pub struct SessionTracker {
    db: DatabaseService,
    inactivity: Duration,
}

impl SessionTracker {
    pub const fn new(db: DatabaseService, inactivity: Duration) -> Self {
        Self { db, inactivity }
    }

    /// Record an authenticated request from `user_id`.
    ///
    /// Writes the user's last-active time, then applies the inactivity rule
    /// to the user's active session. Returns that session, if any.
    pub async fn record_activity(&self, user_id: &str, now_ms: i64) -> Result<Option<Session>> {
        self.db.touch_user(user_id, now_ms).await?;

        let Some(mut session) = self.db.find_active_session(user_id).await? else {
            return Ok(None);
        };
        if track_activity(&mut session, now_ms, self.inactivity) {
            tracing::info!(session = %session.id, "Paused inactive session");
        }
        self.db.update_session(&session).await?;
        Ok(Some(session))
    }

    /// Start a session, pausing the user's currently active one.
    pub async fn start(&self, user_id: &str, request: NewSession, now_ms: i64) -> Result<Session> {
        self.pause_active(user_id, None).await?;

        let mut session = Session::start(user_id, now_ms);
        session.workspace_id = request.workspace_id;
        session.project_id = request.project_id;
        session.task_id = request.task_id;
        if let Some(context) = request.context {
            session.context = context;
        }

        self.db.insert_session(&session).await?;
        tracing::info!(session = %session.id, "Started session");
        Ok(session)
    }

    /// paused -> active
    pub async fn resume(&self, user_id: &str, id: &SessionId, now_ms: i64) -> Result<Session> {
        let mut session = self.owned_session(user_id, id).await?;
        session.resume(now_ms)?;
        self.pause_active(user_id, Some(id)).await?;
        self.db.update_session(&session).await?;
        Ok(session)
    }

    /// Overwrite the context blob and refresh `last_active`.
    pub async fn save_state(
        &self,
        user_id: &str,
        id: &SessionId,
        context: Value,
        now_ms: i64,
    ) -> Result<Session> {
        let mut session = self.owned_session(user_id, id).await?;
        session.save_state(context, now_ms);
        self.db.update_session(&session).await?;
        Ok(session)
    }

    pub async fn complete(&self, user_id: &str, id: &SessionId, now_ms: i64) -> Result<Session> {
        let mut session = self.owned_session(user_id, id).await?;
        session.complete(now_ms)?;
        self.db.update_session(&session).await?;
        tracing::info!(
            session = %session.id,
            duration_minutes = session.duration_minutes.unwrap_or_default(),
            "Completed session"
        );
        Ok(session)
    }

    async fn owned_session(&self, user_id: &str, id: &SessionId) -> Result<Session> {
        let session = self
            .db
            .get_session(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("session {id}")))?;
        if !session.is_owned_by(user_id) {
            return Err(Error::Forbidden(format!("session {id} belongs to another user")));
        }
        Ok(session)
    }

    async fn pause_active(&self, user_id: &str, except: Option<&SessionId>) -> Result<()> {
        while let Some(mut active) = self.db.find_active_session(user_id).await? {
            if except == Some(&active.id) {
                break;
            }
            active.pause()?;
            self.db.update_session(&active).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionStatus;
    use crate::session::DEFAULT_INACTIVITY_TIMEOUT;
    use serde_json::json;

    const START: i64 = 1_700_000_000_000;
    const MINUTE_MS: i64 = 60_000;

    async fn tracker() -> SessionTracker {
        let db = DatabaseService::open_in_memory().await.unwrap();
        SessionTracker::new(db, DEFAULT_INACTIVITY_TIMEOUT)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn activity_after_long_idle_pauses_session() {
        let tracker = tracker().await;
        let session = tracker
            .start("user-1", NewSession::default(), START)
            .await
            .unwrap();

        let now = START + 15 * MINUTE_MS + 1_000;
        let tracked = tracker.record_activity("user-1", now).await.unwrap().unwrap();
        assert_eq!(tracked.id, session.id);
        assert_eq!(tracked.status, SessionStatus::Paused);
        assert_eq!(tracked.last_active, now);
        assert_eq!(tracker.db.user_last_active("user-1").await.unwrap(), Some(now));

        // No active session left to track
        assert!(tracker
            .record_activity("user-1", now + 1)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn activity_within_threshold_keeps_session_active() {
        let tracker = tracker().await;
        tracker
            .start("user-1", NewSession::default(), START)
            .await
            .unwrap();

        let tracked = tracker
            .record_activity("user-1", START + 14 * MINUTE_MS)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(tracked.status, SessionStatus::Active);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn starting_a_session_pauses_the_previous_one() {
        let tracker = tracker().await;
        let first = tracker
            .start("user-1", NewSession::default(), START)
            .await
            .unwrap();
        let second = tracker
            .start(
                "user-1",
                NewSession {
                    task_id: Some("task-1".to_string()),
                    ..NewSession::default()
                },
                START + 1,
            )
            .await
            .unwrap();

        let first = tracker.db.get_session(&first.id).await.unwrap().unwrap();
        assert_eq!(first.status, SessionStatus::Paused);
        assert_eq!(second.task_id.as_deref(), Some("task-1"));
        assert_eq!(
            tracker.db.find_active_session("user-1").await.unwrap().map(|s| s.id),
            Some(second.id)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn resume_reactivates_paused_session() {
        let tracker = tracker().await;
        let first = tracker
            .start("user-1", NewSession::default(), START)
            .await
            .unwrap();
        let second = tracker
            .start("user-1", NewSession::default(), START + 1)
            .await
            .unwrap();

        let resumed = tracker.resume("user-1", &first.id, START + 2).await.unwrap();
        assert_eq!(resumed.status, SessionStatus::Active);
        assert_eq!(resumed.last_active, START + 2);

        let second = tracker.db.get_session(&second.id).await.unwrap().unwrap();
        assert_eq!(second.status, SessionStatus::Paused);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn non_owner_save_state_is_forbidden_and_context_unchanged() {
        let tracker = tracker().await;
        let session = tracker
            .start(
                "owner",
                NewSession {
                    context: Some(json!({"tab": "board"})),
                    ..NewSession::default()
                },
                START,
            )
            .await
            .unwrap();

        let result = tracker
            .save_state("intruder", &session.id, json!({"tab": "stolen"}), START + 1)
            .await;
        assert!(matches!(result, Err(Error::Forbidden(_))));

        let stored = tracker.db.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(stored.context, json!({"tab": "board"}));
        assert_eq!(stored.last_active, START);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn complete_then_resume_is_invalid() {
        let tracker = tracker().await;
        let session = tracker
            .start("user-1", NewSession::default(), START)
            .await
            .unwrap();

        let completed = tracker
            .complete("user-1", &session.id, START + 90 * MINUTE_MS)
            .await
            .unwrap();
        assert_eq!(completed.duration_minutes, Some(90));

        assert!(matches!(
            tracker.resume("user-1", &session.id, START + 91 * MINUTE_MS).await,
            Err(Error::InvalidTransition(_))
        ));
        assert!(matches!(
            tracker.resume("user-1", &SessionId::new(), START).await,
            Err(Error::NotFound(_))
        ));
    }
}
