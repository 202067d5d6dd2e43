//! Database layer for Workspace Manager

mod connection;
mod conflict_repository;
mod entity_repository;
mod kv_repository;
mod migrations;
mod session_repository;

pub use connection::Database;
pub use conflict_repository::{LibSqlConflictRepository, NewConflict};
pub use entity_repository::{ApplyOutcome, EntityRepository, LibSqlEntityRepository, StoredEntity};
pub use kv_repository::{KeyValueRepository, LibSqlKeyValueRepository};
pub use session_repository::{LibSqlSessionRepository, SessionRepository};
