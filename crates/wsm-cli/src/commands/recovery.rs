use wsm_core::SnapshotKind;

use crate::cli::RecoveryCommands;
use crate::commands::common::{format_recovery_point_lines, resolve_recovery_point_id, AppContext};
use crate::error::CliError;

pub async fn run_recovery(ctx: &AppContext, command: RecoveryCommands) -> Result<(), CliError> {
    match command {
        RecoveryCommands::Create { description } => {
            let id = ctx
                .recovery
                .create(
                    &ctx.engine,
                    &description.join(" "),
                    SnapshotKind::Manual,
                    None,
                )
                .await?;
            println!("{id}");
            Ok(())
        }
        RecoveryCommands::List { json } => {
            let points = ctx.recovery.list().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&points)?);
            } else if points.is_empty() {
                println!("No recovery points.");
            } else {
                for line in format_recovery_point_lines(&points) {
                    println!("{line}");
                }
            }
            Ok(())
        }
        RecoveryCommands::Restore { id } => {
            let id = resolve_recovery_point_id(ctx, &id).await?;
            let point = ctx.recovery.restore(&ctx.engine, &id).await?;
            println!("Restored \"{}\" ({})", point.description, point.id);
            Ok(())
        }
    }
}
