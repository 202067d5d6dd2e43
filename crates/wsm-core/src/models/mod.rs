//! Data models for Workspace Manager

/// Declares a UUID v7 backed identifier newtype.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Create a new unique ID using UUID v7 (time-sortable)
            #[must_use]
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// Get the string representation of this ID
            #[must_use]
            pub fn as_str(&self) -> String {
                self.0.to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                Ok(Self(uuid::Uuid::parse_str(s.trim())?))
            }
        }
    };
}

pub(crate) use uuid_id;

mod dead_letter;
mod entity;
mod recovery_point;
mod session;
mod sync_conflict;
mod sync_operation;

pub use dead_letter::DeadLetter;
pub use entity::{Entity, EntityId, EntityKind, EntityRef};
pub use recovery_point::{RecoveryPoint, RecoveryPointId, SnapshotKind};
pub use session::{Session, SessionId, SessionStatus};
pub use sync_conflict::{ConflictWinner, SyncConflict};
pub use sync_operation::{OperationId, OperationKind, SyncOperation};
