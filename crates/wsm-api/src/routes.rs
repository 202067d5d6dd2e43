use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use wsm_core::remote::RemoteAck;
use wsm_core::services::DatabaseService;
use wsm_core::session::{NewSession, SessionTracker};
use wsm_core::util::unix_millis_now;
use wsm_core::{Entity, EntityId, Session, SessionId, SyncOperation};

use crate::auth::{extract_bearer_token, user_fingerprint, AuthenticatedUser, JwtVerifier};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::rate_limit::{EndpointRateLimiter, ProtectedEndpoint, RateLimitMetricsSnapshot};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    db: DatabaseService,
    sessions: SessionTracker,
    jwt_verifier: Arc<JwtVerifier>,
    endpoint_rate_limiter: Arc<EndpointRateLimiter>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, db: DatabaseService) -> Self {
        Self {
            sessions: SessionTracker::new(db.clone(), config.session_inactivity),
            jwt_verifier: Arc::new(JwtVerifier::from_config(&config)),
            endpoint_rate_limiter: Arc::new(EndpointRateLimiter::from_config(config.as_ref())),
            db,
            config,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    // Layers run bottom-up: authentication first, then activity tracking.
    let protected_routes = Router::new()
        .route("/api/resume-session/{id}", get(resume_session))
        .route("/api/session-tracking/save-state", post(save_session_state))
        .route("/api/sessions", post(start_session))
        .route("/api/sessions/{id}/complete", post(complete_session))
        .route("/v1/sync/operations", post(apply_sync_operation))
        .route("/v1/entities/{id}", get(get_entity))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_activity))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    rate_limit: RateLimitMetricsSnapshot,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        rate_limit: state.endpoint_rate_limiter.metrics_snapshot(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(request.headers())?;
    let user = state.jwt_verifier.verify_access_token(token)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Records the caller's activity before the handler runs.
///
/// A failed write is logged and the request proceeds.
async fn track_activity(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let user_id = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|user| user.user_id.clone());

    if let Some(user_id) = user_id {
        if let Err(error) = state
            .sessions
            .record_activity(&user_id, unix_millis_now())
            .await
        {
            tracing::warn!(
                user = user_fingerprint(&user_id),
                "Failed to record session activity: {}",
                error
            );
        }
    }

    next.run(request).await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveStateRequest {
    session_id: String,
    #[serde(default)]
    context: Value,
}

async fn start_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<NewSession>,
) -> Result<(StatusCode, Json<Session>), AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Sessions, &user.user_id)
        .await?;

    let session = state
        .sessions
        .start(&user.user_id, request, unix_millis_now())
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn resume_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<Session>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Sessions, &user.user_id)
        .await?;

    let id = parse_session_id(&id)?;
    let session = state
        .sessions
        .resume(&user.user_id, &id, unix_millis_now())
        .await?;
    tracing::info!(
        endpoint = "resume_session",
        user = user_fingerprint(&user.user_id),
        session = %session.id,
        "Resumed session"
    );
    Ok(Json(session))
}

async fn save_session_state(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(request): Json<SaveStateRequest>,
) -> Result<Json<Session>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Sessions, &user.user_id)
        .await?;

    let id = parse_session_id(&request.session_id)?;
    let session = state
        .sessions
        .save_state(&user.user_id, &id, request.context, unix_millis_now())
        .await?;
    tracing::debug!(session = %session.id, "Saved session state");
    Ok(Json(session))
}

async fn complete_session(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<Session>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::Sessions, &user.user_id)
        .await?;

    let id = parse_session_id(&id)?;
    let session = state
        .sessions
        .complete(&user.user_id, &id, unix_millis_now())
        .await?;
    Ok(Json(session))
}

async fn apply_sync_operation(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(operation): Json<SyncOperation>,
) -> Result<Json<RemoteAck>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncOperations, &user.user_id)
        .await?;

    let outcome = state
        .db
        .apply_operation(&user.user_id, &operation, unix_millis_now())
        .await?;
    tracing::info!(
        endpoint = "sync_operations",
        user = user_fingerprint(&user.user_id),
        operation = %operation.id,
        kind = %operation.kind,
        duplicate = outcome.duplicate,
        stale = outcome.stale,
        "Applied sync operation"
    );

    Ok(Json(RemoteAck {
        operation_id: operation.id,
        duplicate: outcome.duplicate,
        entity: outcome.entity,
    }))
}

async fn get_entity(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(id): Path<String>,
) -> Result<Json<Entity>, AppError> {
    state
        .endpoint_rate_limiter
        .check(ProtectedEndpoint::SyncOperations, &user.user_id)
        .await?;

    let id: EntityId = id
        .parse()
        .map_err(|_| AppError::bad_request(format!("'{id}' is not a valid entity id")))?;
    let stored = state
        .db
        .get_entity(&id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("entity {id}")))?;
    if stored.owner_id != user.user_id {
        return Err(AppError::forbidden(format!(
            "entity {id} belongs to another user"
        )));
    }
    Ok(Json(stored.entity))
}

fn parse_session_id(raw: &str) -> Result<SessionId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("'{raw}' is not a valid session id")))
}
