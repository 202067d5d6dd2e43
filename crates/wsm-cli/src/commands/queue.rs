use crate::cli::QueueCommands;
use crate::commands::common::{format_operation_lines, format_sync_timestamp, AppContext};
use crate::error::CliError;

pub async fn run_queue(ctx: &AppContext, command: QueueCommands) -> Result<(), CliError> {
    match command {
        QueueCommands::List { json } => run_queue_list(ctx, json).await,
        QueueCommands::Discard => run_queue_discard(ctx).await,
        QueueCommands::DeadLetters { json } => run_dead_letters(ctx, json).await,
    }
}

pub async fn run_queue_list(ctx: &AppContext, as_json: bool) -> Result<(), CliError> {
    let pending = ctx.engine.pending().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(());
    }
    if pending.is_empty() {
        println!("No pending operations.");
        return Ok(());
    }

    for line in format_operation_lines(&pending) {
        println!("{line}");
    }
    if let Some(state) = ctx.engine.delivery_state().await {
        println!(
            "Head: {} attempt(s), next retry {}{}",
            state.attempts,
            format_sync_timestamp(state.next_attempt_at),
            state
                .last_error
                .map(|error| format!(", last error: {error}"))
                .unwrap_or_default()
        );
    }
    if let Some(stuck) = ctx.engine.stuck_operation().await {
        let reason = if stuck.permanent {
            "was rejected by the API"
        } else {
            "keeps failing"
        };
        println!(
            "Operation {} {reason}; run `wsm queue discard` to move it aside.",
            stuck.operation.id
        );
    }
    Ok(())
}

pub async fn run_queue_discard(ctx: &AppContext) -> Result<(), CliError> {
    match ctx.engine.discard_head().await? {
        Some(dead_letter) => println!(
            "Discarded {} {} after {} attempt(s)",
            dead_letter.operation.kind, dead_letter.operation.entity, dead_letter.attempts
        ),
        None => println!("No pending operations."),
    }
    Ok(())
}

pub async fn run_dead_letters(ctx: &AppContext, as_json: bool) -> Result<(), CliError> {
    let dead_letters = ctx.engine.dead_letters().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&dead_letters)?);
        return Ok(());
    }
    if dead_letters.is_empty() {
        println!("No discarded operations.");
        return Ok(());
    }
    for dead_letter in &dead_letters {
        println!(
            "{}  {}  {}  attempts={}  {}",
            format_sync_timestamp(dead_letter.discarded_at),
            dead_letter.operation.kind,
            dead_letter.operation.entity,
            dead_letter.attempts,
            dead_letter.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
