use std::env;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use wsm_core::config::ClientConfig;
use wsm_core::recovery::RecoveryPointStore;
use wsm_core::remote::HttpRemoteStore;
use wsm_core::services::DatabaseService;
use wsm_core::store::LocalStore;
use wsm_core::sync::{DrainReport, DrainStop, SyncEngine};
use wsm_core::{Entity, EntityId, RecoveryPoint, RecoveryPointId, SyncConflict, SyncOperation};

use crate::error::CliError;

pub type ClientEngine = SyncEngine<DatabaseService, Option<HttpRemoteStore>>;

/// Everything a command needs, opened once per invocation.
pub struct AppContext {
    pub config: ClientConfig,
    pub engine: ClientEngine,
    pub recovery: RecoveryPointStore<DatabaseService>,
}

impl AppContext {
    pub async fn open(
        db_path: &Path,
        config: ClientConfig,
        offline: bool,
    ) -> Result<Self, CliError> {
        let db = DatabaseService::open_recoverable(db_path).await?;
        let remote = config
            .api_base_url
            .as_deref()
            .map(|url| HttpRemoteStore::new(url, config.access_token.clone()))
            .transpose()?;
        let online = !offline && remote.is_some();

        let store = LocalStore::new(db);
        let engine = SyncEngine::open(store.clone(), remote, config.retry, online).await;
        let recovery = RecoveryPointStore::new(store, config.retention);
        tracing::debug!(db = %db_path.display(), online, "Opened local state");

        Ok(Self {
            config,
            engine,
            recovery,
        })
    }

    pub fn remote(&self) -> Result<&HttpRemoteStore, CliError> {
        self.engine
            .remote()
            .as_ref()
            .ok_or(CliError::SyncNotConfigured)
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(path) = cli_db_path.or_else(|| env::var_os("WSM_DB_PATH").map(PathBuf::from)) {
        return Ok(path);
    }
    default_db_path()
}

pub fn default_db_path() -> Result<PathBuf, CliError> {
    dirs::data_dir()
        .map(|dir| dir.join("wsm").join("wsm.db"))
        .ok_or_else(|| CliError::Config("Failed to resolve CLI data directory".to_string()))
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyId)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Parse `key=value` pairs. Values that are valid JSON keep their type;
/// anything else is taken as a string.
pub fn parse_field_assignments(assignments: &[String]) -> Result<Map<String, Value>, CliError> {
    let mut fields = Map::new();
    for assignment in assignments {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| CliError::InvalidField(assignment.clone()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::InvalidField(assignment.clone()));
        }
        let value = serde_json::from_str(raw.trim())
            .unwrap_or_else(|_| Value::String(raw.trim().to_string()));
        fields.insert(key.to_string(), value);
    }
    Ok(fields)
}

pub fn parse_json_document(raw: &str) -> Result<Value, CliError> {
    Ok(serde_json::from_str(raw.trim())?)
}

/// Resolve an exact id or a unique prefix among `candidates`.
pub fn resolve_id_prefix<T>(query: &str, candidates: &[T]) -> Result<T, CliError>
where
    T: Copy + std::fmt::Display,
{
    let query = normalize_identifier(query)?;
    if let Some(exact) = candidates.iter().find(|id| id.to_string() == query) {
        return Ok(*exact);
    }

    let matches: Vec<&T> = candidates
        .iter()
        .filter(|id| id.to_string().starts_with(&query))
        .collect();

    match matches.as_slice() {
        [] => Err(CliError::NotFound(query)),
        [only] => Ok(**only),
        many => {
            let options = many
                .iter()
                .take(3)
                .map(|id| short_id(&id.to_string()))
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousId(format!(
                "ID prefix '{query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

pub async fn resolve_entity_id(ctx: &AppContext, query: &str) -> Result<EntityId, CliError> {
    if let Ok(id) = query.trim().parse::<EntityId>() {
        return Ok(id);
    }
    let ids: Vec<EntityId> = ctx
        .engine
        .list_entities(None, true)
        .await?
        .iter()
        .map(|entity| entity.id)
        .collect();
    resolve_id_prefix(query, &ids)
}

pub async fn resolve_recovery_point_id(
    ctx: &AppContext,
    query: &str,
) -> Result<RecoveryPointId, CliError> {
    let ids: Vec<RecoveryPointId> = ctx.recovery.list().await.iter().map(|p| p.id).collect();
    resolve_id_prefix(query, &ids)
}

pub fn short_id(id: &str) -> String {
    id.chars().take(13).collect()
}

pub fn describe_drain(report: &DrainReport) -> String {
    let reason = match report.stop {
        DrainStop::Empty => "queue empty",
        DrainStop::Offline => "offline, kept queued",
        DrainStop::AlreadyDraining => "another drain is running",
        DrainStop::Failed => "delivery failed, will retry",
        DrainStop::Backoff => "waiting for retry backoff",
    };
    format!("delivered {} ({reason})", report.delivered)
}

#[derive(Debug, Serialize)]
pub struct EntityListItem {
    pub id: String,
    pub kind: String,
    pub label: String,
    pub updated_at: i64,
    pub relative_time: String,
    pub is_deleted: bool,
}

pub fn entity_to_list_item(entity: &Entity) -> EntityListItem {
    EntityListItem {
        id: entity.id.to_string(),
        kind: entity.kind.to_string(),
        label: entity.label(),
        updated_at: entity.updated_at,
        relative_time: format_relative_time(entity.updated_at, Utc::now().timestamp_millis()),
        is_deleted: entity.is_deleted,
    }
}

pub fn format_entity_lines(entities: &[Entity]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    entities
        .iter()
        .map(|entity| {
            let short = short_id(&entity.id.to_string());
            let relative_time = format_relative_time(entity.updated_at, now_ms);
            let deleted = if entity.is_deleted { "  (deleted)" } else { "" };
            format!(
                "{short:<13}  {:<9}  {:<40}  {relative_time}{deleted}",
                entity.kind,
                entity.label()
            )
        })
        .collect()
}

pub fn format_operation_lines(operations: &[SyncOperation]) -> Vec<String> {
    operations
        .iter()
        .enumerate()
        .map(|(position, operation)| {
            format!(
                "{:>3}  {}  {:<14}  {}  queued {}",
                position + 1,
                short_id(&operation.id.to_string()),
                operation.kind,
                operation.entity,
                format_sync_timestamp(operation.enqueued_at)
            )
        })
        .collect()
}

pub fn format_recovery_point_lines(points: &[RecoveryPoint]) -> Vec<String> {
    points
        .iter()
        .map(|point| {
            format!(
                "{}  {}  {:<15}  {}",
                short_id(&point.id.to_string()),
                format_sync_timestamp(point.created_at),
                point.kind,
                point.description
            )
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub entity_id: String,
    pub local_updated_at: i64,
    pub incoming_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub strategy: String,
    pub winner: String,
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        entity_id: conflict.entity_id.clone(),
        local_updated_at: conflict.local_updated_at,
        incoming_updated_at: conflict.incoming_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        strategy: conflict.strategy.clone(),
        winner: conflict.winner.to_string(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<4}  kept={}  entity={}  local={} incoming={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.strategy,
                conflict.winner,
                conflict.entity_id,
                conflict.local_updated_at,
                conflict.incoming_updated_at
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
