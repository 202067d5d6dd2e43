use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use wsm_core::EntityKind;

#[derive(Parser)]
#[command(name = "wsm")]
#[command(about = "Offline-first workspace, project and task tracking")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Keep every change local; nothing is sent to the API
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create, edit and inspect entities
    Entity {
        #[command(subcommand)]
        command: EntityCommands,
    },
    /// Save workspace documents
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },
    /// Inspect pending sync operations
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Deliver pending operations to the API
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Create, list and restore recovery points
    Recovery {
        #[command(subcommand)]
        command: RecoveryCommands,
    },
    /// Manage work sessions on the API
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Drain periodically and autosave until Ctrl-C
    Watch,
    /// Show or change client configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Workspace,
    Project,
    Task,
    Session,
}

impl From<KindArg> for EntityKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Workspace => Self::Workspace,
            KindArg::Project => Self::Project,
            KindArg::Task => Self::Task,
            KindArg::Session => Self::Session,
        }
    }
}

#[derive(Subcommand)]
pub enum EntityCommands {
    /// Create an entity
    Add {
        #[arg(value_enum)]
        kind: KindArg,
        /// Field assignment `key=value`; values are parsed as JSON when possible
        #[arg(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
    /// Change fields of an entity; `key=null` removes a field
    Update {
        /// Entity ID or unique ID prefix
        id: String,
        #[arg(short, long = "field", value_name = "KEY=VALUE", required = true)]
        fields: Vec<String>,
    },
    /// Delete an entity
    Delete {
        /// Entity ID or unique ID prefix
        id: String,
    },
    /// Show one entity, preferring a newer remote copy
    Show {
        /// Entity ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List local entities
    List {
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Include deleted entities
        #[arg(long)]
        include_deleted: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum WorkspaceCommands {
    /// Push the full workspace document, merging field changes first
    Save {
        /// Workspace ID or unique ID prefix
        id: String,
        #[arg(short, long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List pending operations in delivery order
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move the head operation to the dead-letter list
    Discard,
    /// List discarded operations
    DeadLetters {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum RecoveryCommands {
    /// Snapshot the current state
    Create {
        /// What the recovery point is for
        #[arg(required = true)]
        description: Vec<String>,
    },
    /// List recovery points, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replace the current state with a recovery point
    Restore {
        /// Recovery point ID or unique ID prefix
        id: String,
    },
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Start a session, pausing the active one
    Start {
        #[arg(long, value_name = "ID")]
        workspace: Option<String>,
        #[arg(long, value_name = "ID")]
        project: Option<String>,
        #[arg(long, value_name = "ID")]
        task: Option<String>,
        /// Initial context as a JSON document
        #[arg(long, value_name = "JSON")]
        context: Option<String>,
    },
    /// Resume a paused session
    Resume { id: String },
    /// Overwrite the saved context of a session
    SaveState {
        id: String,
        /// Context as a JSON document
        #[arg(long, value_name = "JSON")]
        context: String,
    },
    /// Complete a session
    Complete { id: String },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set one configuration key; an empty value clears optional keys
    Set { key: String, value: String },
    /// Print the configuration file path
    Path,
}
