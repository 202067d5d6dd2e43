use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] wsm_core::Error),
    #[error(transparent)]
    Remote(#[from] wsm_core::remote::RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("ID cannot be empty")]
    EmptyId,
    #[error("Nothing found for id/prefix: {0}")]
    NotFound(String),
    #[error("{0}")]
    AmbiguousId(String),
    #[error("Invalid field assignment '{0}' (expected KEY=VALUE)")]
    InvalidField(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Run `wsm config set api_base_url <URL>` and `wsm config set access_token <TOKEN>`, or set WSM_API_BASE_URL and WSM_ACCESS_TOKEN."
    )]
    SyncNotConfigured,
}

impl CliError {
    /// Failures of the local state itself rather than of the user's input.
    ///
    /// These get an error-triggered recovery point.
    pub fn is_unexpected(&self) -> bool {
        match self {
            Self::Core(error) => matches!(
                error,
                wsm_core::Error::Database(_)
                    | wsm_core::Error::LibSql(_)
                    | wsm_core::Error::Io(_)
                    | wsm_core::Error::Serialization(_)
            ),
            Self::Io(_) | Self::Serialization(_) => true,
            Self::Remote(_)
            | Self::EmptyId
            | Self::NotFound(_)
            | Self::AmbiguousId(_)
            | Self::InvalidField(_)
            | Self::Config(_)
            | Self::SyncNotConfigured => false,
        }
    }
}
