//! Remote system client used by the sync engine.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{Entity, EntityId, OperationId, Session, SessionId, SyncOperation};
use crate::session::NewSession;
use crate::util::{canonical_api_url, one_line_summary, trimmed_non_empty};

const REMOTE_HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("Remote unreachable: {0}")]
    Transport(String),
    #[error("Remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("Remote refused credentials: {0}")]
    Unauthorized(String),
    #[error("Invalid remote configuration: {0}")]
    InvalidConfiguration(String),
}

impl RemoteError {
    /// Whether retrying the same request can never succeed.
    ///
    /// Client errors are permanent except 401, 408 and 429.
    pub const fn is_permanent(&self) -> bool {
        match self {
            Self::Rejected { status, .. } => {
                *status >= 400 && *status < 500 && !matches!(*status, 401 | 408 | 429)
            }
            Self::InvalidConfiguration(_) => true,
            Self::Transport(_) | Self::Unauthorized(_) => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

/// Acknowledgement for one applied sync operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAck {
    pub operation_id: OperationId,
    /// The remote had already applied this operation id
    pub duplicate: bool,
    /// Authoritative copy after the operation
    pub entity: Option<Entity>,
}

/// The remote system the queue drains into.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Apply one operation. Must be idempotent on the operation id.
    async fn apply(&self, operation: &SyncOperation) -> Result<RemoteAck, RemoteError>;

    /// Fetch the remote copy of an entity, `None` if the remote has none.
    async fn fetch(&self, id: &EntityId) -> Result<Option<Entity>, RemoteError>;
}

/// An unconfigured remote behaves like an unreachable one, so operations stay
/// queued until sync is set up.
impl<R: RemoteStore> RemoteStore for Option<R> {
    async fn apply(&self, operation: &SyncOperation) -> Result<RemoteAck, RemoteError> {
        match self {
            Some(remote) => remote.apply(operation).await,
            None => Err(not_configured()),
        }
    }

    async fn fetch(&self, id: &EntityId) -> Result<Option<Entity>, RemoteError> {
        match self {
            Some(remote) => remote.fetch(id).await,
            None => Err(not_configured()),
        }
    }
}

fn not_configured() -> RemoteError {
    RemoteError::Transport("sync is not configured".to_string())
}

/// `RemoteStore` backed by the wsm API over HTTP.
#[derive(Clone)]
pub struct HttpRemoteStore {
    base_url: String,
    access_token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteStore")
            .field("base_url", &self.base_url)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl HttpRemoteStore {
    pub fn new(
        base_url: impl Into<String>,
        access_token: Option<String>,
    ) -> Result<Self, RemoteError> {
        let base_url = normalize_base_url(&base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REMOTE_HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url,
            access_token: trimmed_non_empty(access_token),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Reachability check against the unauthenticated health endpoint.
    pub async fn probe(&self) -> Result<(), RemoteError> {
        let url = format!("{}/healthz", self.base_url);
        let response = self.client.get(url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(response).await)
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = request.header(reqwest::header::ACCEPT, "application/json");
        match self.access_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl RemoteStore for HttpRemoteStore {
    async fn apply(&self, operation: &SyncOperation) -> Result<RemoteAck, RemoteError> {
        let url = format!("{}/v1/sync/operations", self.base_url);
        let response = self
            .authorized(self.client.post(url))
            .json(operation)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response.json::<RemoteAck>().await?)
    }

    async fn fetch(&self, id: &EntityId) -> Result<Option<Entity>, RemoteError> {
        let url = format!("{}/v1/entities/{id}", self.base_url);
        let response = self.authorized(self.client.get(url)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(Some(response.json::<Entity>().await?))
    }
}

// Session endpoints

impl HttpRemoteStore {
    pub async fn start_session(&self, request: &NewSession) -> Result<Session, RemoteError> {
        let url = format!("{}/api/sessions", self.base_url);
        let response = self
            .authorized(self.client.post(url))
            .json(request)
            .send()
            .await?;
        session_from_response(response).await
    }

    pub async fn resume_session(&self, id: &SessionId) -> Result<Session, RemoteError> {
        let url = format!("{}/api/resume-session/{id}", self.base_url);
        let response = self.authorized(self.client.get(url)).send().await?;
        session_from_response(response).await
    }

    pub async fn save_session_state(
        &self,
        id: &SessionId,
        context: &Value,
    ) -> Result<Session, RemoteError> {
        let url = format!("{}/api/session-tracking/save-state", self.base_url);
        let body = serde_json::json!({ "sessionId": id, "context": context });
        let response = self
            .authorized(self.client.post(url))
            .json(&body)
            .send()
            .await?;
        session_from_response(response).await
    }

    pub async fn complete_session(&self, id: &SessionId) -> Result<Session, RemoteError> {
        let url = format!("{}/api/sessions/{id}/complete", self.base_url);
        let response = self.authorized(self.client.post(url)).send().await?;
        session_from_response(response).await
    }
}

async fn session_from_response(response: reqwest::Response) -> Result<Session, RemoteError> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }
    Ok(response.json::<Session>().await?)
}

#[derive(Debug, Deserialize)]
struct RemoteErrorBody {
    error: Option<String>,
    message: Option<String>,
}

async fn error_from_response(response: reqwest::Response) -> RemoteError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = parse_api_error(&body);

    if status == StatusCode::UNAUTHORIZED {
        RemoteError::Unauthorized(message)
    } else {
        RemoteError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

fn parse_api_error(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<RemoteErrorBody>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return message.trim().to_string();
        }
    }

    let trimmed = one_line_summary(body);
    if trimmed.is_empty() {
        "no response body".to_string()
    } else {
        trimmed
    }
}

fn normalize_base_url(raw: &str) -> Result<String, RemoteError> {
    if raw.trim().is_empty() {
        return Err(RemoteError::InvalidConfiguration(
            "API base URL must not be empty".to_string(),
        ));
    }
    canonical_api_url(raw).ok_or_else(|| {
        RemoteError::InvalidConfiguration(
            "API base URL must include http:// or https:// and a host".to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_rejections_exclude_retryable_statuses() {
        let rejected = |status| RemoteError::Rejected {
            status,
            message: String::new(),
        };
        assert!(rejected(400).is_permanent());
        assert!(rejected(403).is_permanent());
        assert!(rejected(422).is_permanent());
        assert!(!rejected(401).is_permanent());
        assert!(!rejected(408).is_permanent());
        assert!(!rejected(429).is_permanent());
        assert!(!rejected(500).is_permanent());
        assert!(!rejected(503).is_permanent());
        assert!(!RemoteError::Transport("reset".to_string()).is_permanent());
    }

    #[tokio::test]
    async fn missing_remote_is_retryable() {
        let remote: Option<HttpRemoteStore> = None;
        let error = remote.fetch(&EntityId::new()).await.unwrap_err();
        assert!(matches!(error, RemoteError::Transport(_)));
        assert!(!error.is_permanent());
    }

    #[test]
    fn base_url_is_validated_and_trimmed() {
        assert!(HttpRemoteStore::new("", None).is_err());
        assert!(HttpRemoteStore::new("api.example.com", None).is_err());

        let store = HttpRemoteStore::new(" https://api.example.com/ ", None).unwrap();
        assert_eq!(store.base_url(), "https://api.example.com");
    }

    #[test]
    fn debug_redacts_access_token() {
        let store =
            HttpRemoteStore::new("https://api.example.com", Some("secret".to_string())).unwrap();
        let debug = format!("{store:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn parse_api_error_prefers_json_error_field() {
        assert_eq!(parse_api_error(r#"{"error":" Forbidden "}"#), "Forbidden");
        assert_eq!(parse_api_error("plain failure"), "plain failure");
        assert_eq!(parse_api_error("  "), "no response body");
    }

    #[test]
    fn ack_uses_camel_case() {
        let ack = RemoteAck {
            operation_id: OperationId::new(),
            duplicate: true,
            entity: None,
        };
        let value = serde_json::to_value(&ack).unwrap();
        assert!(value.get("operationId").is_some());
        assert_eq!(value["duplicate"], serde_json::json!(true));
    }
}
