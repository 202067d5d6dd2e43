//! wsm-core - Core library for Workspace Manager
//!
//! This crate contains the shared models, libSQL database layer, local store,
//! sync queue/engine, recovery points and session state machine used by the
//! API server and the CLI client.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod recovery;
pub mod remote;
pub mod services;
pub mod session;
pub mod store;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{
    Entity, EntityId, EntityKind, EntityRef, OperationId, OperationKind, RecoveryPoint,
    RecoveryPointId, Session, SessionId, SessionStatus, SnapshotKind, SyncConflict,
    SyncOperation,
};
