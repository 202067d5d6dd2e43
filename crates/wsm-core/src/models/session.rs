//! Work session model and its status transitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

use super::uuid_id;

uuid_id!(
    /// A unique identifier for a work session
    SessionId
);

const MINUTE_MS: i64 = 60_000;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Completed,
}

impl SessionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            other => Err(Error::InvalidInput(format!("unknown session status '{other}'"))),
        }
    }
}

/// Server-side record of a user's work session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    /// Owning user
    pub user_id: String,
    pub workspace_id: Option<String>,
    pub project_id: Option<String>,
    pub task_id: Option<String>,
    pub status: SessionStatus,
    /// Unix ms
    pub started_at: i64,
    /// Unix ms
    pub last_active: i64,
    /// Unix ms
    pub completed_at: Option<i64>,
    pub duration_minutes: Option<i64>,
    /// Free-form client state blob
    pub context: Value,
}

impl Session {
    /// Start a new active session for `user_id`
    #[must_use]
    pub fn start(user_id: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: SessionId::new(),
            user_id: user_id.into(),
            workspace_id: None,
            project_id: None,
            task_id: None,
            status: SessionStatus::Active,
            started_at: now_ms,
            last_active: now_ms,
            completed_at: None,
            duration_minutes: None,
            context: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// active -> paused
    pub fn pause(&mut self) -> Result<()> {
        match self.status {
            SessionStatus::Active => {
                self.status = SessionStatus::Paused;
                Ok(())
            }
            SessionStatus::Paused => Ok(()),
            SessionStatus::Completed => Err(Error::InvalidTransition(format!(
                "session {} is completed and cannot be paused",
                self.id
            ))),
        }
    }

    /// paused -> active; resuming an active session only refreshes `last_active`
    pub fn resume(&mut self, now_ms: i64) -> Result<()> {
        if self.status == SessionStatus::Completed {
            return Err(Error::InvalidTransition(format!(
                "session {} is completed and cannot be resumed",
                self.id
            )));
        }
        self.status = SessionStatus::Active;
        self.last_active = now_ms;
        Ok(())
    }

    /// any open status -> completed, computing the rounded duration in minutes
    pub fn complete(&mut self, now_ms: i64) -> Result<()> {
        if self.status == SessionStatus::Completed {
            return Err(Error::InvalidTransition(format!(
                "session {} is already completed",
                self.id
            )));
        }
        self.status = SessionStatus::Completed;
        self.completed_at = Some(now_ms);
        self.last_active = now_ms;
        self.duration_minutes = Some(rounded_minutes(self.started_at, now_ms));
        Ok(())
    }

    /// Replace the context blob and refresh `last_active`
    pub fn save_state(&mut self, context: Value, now_ms: i64) {
        self.context = context;
        self.last_active = now_ms;
    }
}

fn rounded_minutes(started_at: i64, completed_at: i64) -> i64 {
    let elapsed = completed_at.saturating_sub(started_at).max(0);
    elapsed.saturating_add(MINUTE_MS / 2) / MINUTE_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: i64 = 1_700_000_000_000;

    #[test]
    fn test_new_session_is_active() {
        let session = Session::start("user-1", START);
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.last_active, START);
        assert!(session.is_owned_by("user-1"));
        assert!(!session.is_owned_by("user-2"));
    }

    #[test]
    fn test_pause_and_resume() {
        let mut session = Session::start("user-1", START);
        session.pause().unwrap();
        assert_eq!(session.status, SessionStatus::Paused);

        session.resume(START + 1_000).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.last_active, START + 1_000);
    }

    #[test]
    fn test_complete_rounds_duration() {
        let mut session = Session::start("user-1", START);
        // 44.5 minutes rounds up to 45
        session.complete(START + 44 * MINUTE_MS + 30_000).unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.duration_minutes, Some(45));
        assert_eq!(session.completed_at, Some(START + 44 * MINUTE_MS + 30_000));

        let mut short = Session::start("user-1", START);
        short.complete(START + 29_000).unwrap();
        assert_eq!(short.duration_minutes, Some(0));
    }

    #[test]
    fn test_completed_session_rejects_transitions() {
        let mut session = Session::start("user-1", START);
        session.pause().unwrap();
        session.complete(START + MINUTE_MS).unwrap();

        assert!(matches!(
            session.resume(START + 2 * MINUTE_MS),
            Err(Error::InvalidTransition(_))
        ));
        assert!(session.pause().is_err());
        assert!(session.complete(START + 3 * MINUTE_MS).is_err());
    }

    #[test]
    fn test_session_serializes_camel_case() {
        let session = Session::start("user-1", START);
        let value = serde_json::to_value(&session).unwrap();
        assert!(value.get("lastActive").is_some());
        assert!(value.get("durationMinutes").is_some());
        assert_eq!(value["status"], "active");
    }
}
