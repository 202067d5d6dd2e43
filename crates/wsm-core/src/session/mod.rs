//! Server-side session activity tracking.

mod service;

pub use service::{NewSession, SessionTracker};

use std::time::Duration;

use crate::models::{Session, SessionStatus};
use crate::util::duration_millis;

/// Inactivity after which an active session is paused
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Apply one tracked request to `session`.
///
/// An active session idle for strictly longer than `inactivity` is paused
/// first; `last_active` is then moved to `now_ms` either way. Completed
/// sessions are left untouched. Returns whether the session was paused.
pub fn track_activity(session: &mut Session, now_ms: i64, inactivity: Duration) -> bool {
    if session.status == SessionStatus::Completed {
        return false;
    }

    let threshold_ms = duration_millis(inactivity);
    let idle_ms = now_ms.saturating_sub(session.last_active);
    let paused = session.status == SessionStatus::Active && idle_ms > threshold_ms;
    if paused {
        session.status = SessionStatus::Paused;
    }
    session.last_active = session.last_active.max(now_ms);
    paused
}

#[cfg(test)]
mod tests {
    use super::*;

    const START: i64 = 1_700_000_000_000;
    const MINUTE_MS: i64 = 60_000;

    #[test]
    fn idle_past_threshold_pauses() {
        let mut session = Session::start("user-1", START);
        let now = START + 15 * MINUTE_MS + 1_000;

        assert!(track_activity(&mut session, now, DEFAULT_INACTIVITY_TIMEOUT));
        assert_eq!(session.status, SessionStatus::Paused);
        assert_eq!(session.last_active, now);
    }

    #[test]
    fn idle_within_threshold_stays_active() {
        let mut session = Session::start("user-1", START);
        let now = START + 14 * MINUTE_MS;

        assert!(!track_activity(&mut session, now, DEFAULT_INACTIVITY_TIMEOUT));
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.last_active, now);
    }

    #[test]
    fn exactly_threshold_stays_active() {
        let mut session = Session::start("user-1", START);
        assert!(!track_activity(
            &mut session,
            START + 15 * MINUTE_MS,
            DEFAULT_INACTIVITY_TIMEOUT
        ));
        assert_eq!(session.status, SessionStatus::Active);
    }

    #[test]
    fn completed_session_is_untouched() {
        let mut session = Session::start("user-1", START);
        session.complete(START + MINUTE_MS).unwrap();
        let before = session.clone();

        assert!(!track_activity(
            &mut session,
            START + 60 * MINUTE_MS,
            DEFAULT_INACTIVITY_TIMEOUT
        ));
        assert_eq!(session, before);
    }
}
