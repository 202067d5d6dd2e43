use wsm_core::sync::DrainStop;

use crate::commands::common::{
    describe_drain, format_sync_conflict_lines, sync_conflict_to_item, AppContext,
    SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_sync(ctx: &AppContext) -> Result<(), CliError> {
    ctx.remote()?;

    let report = ctx.engine.drain_now().await;
    println!("Sync: {}", describe_drain(&report));

    if report.stop == DrainStop::Failed {
        if let Some(state) = ctx.engine.delivery_state().await {
            if let Some(error) = state.last_error {
                println!("Last error: {error}");
            }
        }
    }
    if let Some(stuck) = ctx.engine.stuck_operation().await {
        println!(
            "Operation {} is stuck after {} attempt(s); run `wsm queue discard` to move it aside.",
            stuck.operation.id, stuck.attempts
        );
    }
    Ok(())
}

pub async fn run_sync_conflicts(
    ctx: &AppContext,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let conflicts = ctx.engine.conflicts(limit).await?;

    if as_json {
        let json_items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }

    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}
