use wsm_core::session::NewSession;
use wsm_core::{Session, SessionId};

use crate::cli::SessionCommands;
use crate::commands::common::{format_sync_timestamp, parse_json_document, AppContext};
use crate::error::CliError;

pub async fn run_session(ctx: &AppContext, command: SessionCommands) -> Result<(), CliError> {
    let remote = ctx.remote()?;

    let session = match command {
        SessionCommands::Start {
            workspace,
            project,
            task,
            context,
        } => {
            let request = NewSession {
                workspace_id: workspace,
                project_id: project,
                task_id: task,
                context: context.as_deref().map(parse_json_document).transpose()?,
            };
            remote.start_session(&request).await?
        }
        SessionCommands::Resume { id } => remote.resume_session(&parse_session_id(&id)?).await?,
        SessionCommands::SaveState { id, context } => {
            let context = parse_json_document(&context)?;
            remote
                .save_session_state(&parse_session_id(&id)?, &context)
                .await?
        }
        SessionCommands::Complete { id } => {
            remote.complete_session(&parse_session_id(&id)?).await?
        }
    };

    print_session(&session);
    Ok(())
}

pub fn parse_session_id(raw: &str) -> Result<SessionId, CliError> {
    raw.trim()
        .parse()
        .map_err(|_| CliError::NotFound(format!("session {}", raw.trim())))
}

fn print_session(session: &Session) {
    println!("{}  {}", session.id, session.status);
    println!("  last active  {}", format_sync_timestamp(session.last_active));
    if let Some(minutes) = session.duration_minutes {
        println!("  duration     {minutes} min");
    }
}
