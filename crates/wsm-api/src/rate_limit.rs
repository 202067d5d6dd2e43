//! Fixed-window request limits per user on the sync and session endpoints.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::auth::user_fingerprint;
use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct EndpointRateLimiter {
    windows: Arc<Mutex<WindowTable>>,
    window: Duration,
    sync_limit: u32,
    session_limit: u32,
    counters: Arc<[EndpointCounters; 2]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtectedEndpoint {
    SyncOperations,
    Sessions,
}

#[derive(Default)]
struct EndpointCounters {
    allowed: AtomicU64,
    limited: AtomicU64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub sync_allowed: u64,
    pub sync_limited: u64,
    pub session_allowed: u64,
    pub session_limited: u64,
}

/// Open windows keyed by endpoint and user. Windows that ran out are
/// dropped at most once per window length.
struct WindowTable {
    open: HashMap<(ProtectedEndpoint, String), RateWindow>,
    last_pruned: Instant,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started_at: Instant,
    count: u32,
}

impl WindowTable {
    fn new(now: Instant) -> Self {
        Self {
            open: HashMap::new(),
            last_pruned: now,
        }
    }

    fn prune_expired(&mut self, now: Instant, window: Duration) {
        if now.duration_since(self.last_pruned) < window {
            return;
        }
        let before = self.open.len();
        self.open
            .retain(|_, entry| now.duration_since(entry.started_at) < window);
        self.last_pruned = now;
        if before != self.open.len() {
            tracing::debug!(
                dropped = before - self.open.len(),
                remaining = self.open.len(),
                "Pruned expired rate limit windows"
            );
        }
    }
}

impl EndpointRateLimiter {
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.rate_limit_window,
            config.sync_rate_limit_per_window,
            config.session_rate_limit_per_window,
        )
    }

    fn new(window: Duration, sync_limit: u32, session_limit: u32) -> Self {
        Self {
            windows: Arc::new(Mutex::new(WindowTable::new(Instant::now()))),
            window,
            sync_limit,
            session_limit,
            counters: Arc::new([EndpointCounters::default(), EndpointCounters::default()]),
        }
    }

    pub async fn check(&self, endpoint: ProtectedEndpoint, user_id: &str) -> Result<(), AppError> {
        self.check_at(endpoint, user_id, Instant::now()).await
    }

    async fn check_at(
        &self,
        endpoint: ProtectedEndpoint,
        user_id: &str,
        now: Instant,
    ) -> Result<(), AppError> {
        let limit = endpoint.limit(self);
        let counters = &self.counters[endpoint.index()];

        let mut table = self.windows.lock().await;
        table.prune_expired(now, self.window);

        let entry = table
            .open
            .entry((endpoint, user_id.to_string()))
            .or_insert(RateWindow {
                started_at: now,
                count: 0,
            });
        if now.duration_since(entry.started_at) >= self.window {
            *entry = RateWindow {
                started_at: now,
                count: 0,
            };
        }

        if entry.count >= limit {
            let retry_after_secs = self
                .window
                .saturating_sub(now.duration_since(entry.started_at))
                .as_secs()
                .max(1);
            counters.limited.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                endpoint = endpoint.label(),
                user = user_fingerprint(user_id),
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(AppError::too_many_requests(
                format!("Too many {} requests", endpoint.label()),
                retry_after_secs,
            ));
        }

        entry.count += 1;
        counters.allowed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        let [sync, session] = self.counters.as_ref();
        RateLimitMetricsSnapshot {
            sync_allowed: sync.allowed.load(Ordering::Relaxed),
            sync_limited: sync.limited.load(Ordering::Relaxed),
            session_allowed: session.allowed.load(Ordering::Relaxed),
            session_limited: session.limited.load(Ordering::Relaxed),
        }
    }
}

impl ProtectedEndpoint {
    pub const fn label(self) -> &'static str {
        match self {
            Self::SyncOperations => "sync_operations",
            Self::Sessions => "sessions",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::SyncOperations => 0,
            Self::Sessions => 1,
        }
    }

    const fn limit(self, limiter: &EndpointRateLimiter) -> u32 {
        match self {
            Self::SyncOperations => limiter.sync_limit,
            Self::Sessions => limiter.session_limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn blocks_after_limit_until_window_ends() {
        let limiter = EndpointRateLimiter::new(WINDOW, 2, 2);
        let start = Instant::now();

        for _ in 0..2 {
            limiter
                .check_at(ProtectedEndpoint::SyncOperations, "user-a", start)
                .await
                .unwrap();
        }
        let err = limiter
            .check_at(
                ProtectedEndpoint::SyncOperations,
                "user-a",
                start + Duration::from_secs(15),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::TooManyRequests(_, 45)));

        limiter
            .check_at(ProtectedEndpoint::SyncOperations, "user-a", start + WINDOW)
            .await
            .unwrap();

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.sync_allowed, 3);
        assert_eq!(metrics.sync_limited, 1);
    }

    #[tokio::test]
    async fn windows_are_per_endpoint_and_user() {
        let limiter = EndpointRateLimiter::new(WINDOW, 1, 1);

        limiter
            .check(ProtectedEndpoint::SyncOperations, "user-a")
            .await
            .unwrap();
        limiter
            .check(ProtectedEndpoint::Sessions, "user-a")
            .await
            .unwrap();
        limiter
            .check(ProtectedEndpoint::SyncOperations, "user-b")
            .await
            .unwrap();
        assert!(limiter
            .check(ProtectedEndpoint::Sessions, "user-a")
            .await
            .is_err());

        let metrics = limiter.metrics_snapshot();
        assert_eq!(metrics.session_allowed, 1);
        assert_eq!(metrics.session_limited, 1);
    }

    #[tokio::test]
    async fn expired_windows_are_pruned() {
        let limiter = EndpointRateLimiter::new(WINDOW, 5, 5);
        let start = Instant::now();

        for user in ["user-a", "user-b", "user-c"] {
            limiter
                .check_at(ProtectedEndpoint::Sessions, user, start)
                .await
                .unwrap();
        }
        assert_eq!(limiter.windows.lock().await.open.len(), 3);

        let later = start + WINDOW + Duration::from_secs(1);
        limiter
            .check_at(ProtectedEndpoint::Sessions, "user-d", later)
            .await
            .unwrap();

        let table = limiter.windows.lock().await;
        assert_eq!(table.open.len(), 1);
        assert!(table
            .open
            .contains_key(&(ProtectedEndpoint::Sessions, "user-d".to_string())));
    }
}
