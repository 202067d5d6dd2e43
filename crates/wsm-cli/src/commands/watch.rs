use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use wsm_core::SnapshotKind;

use crate::commands::common::{describe_drain, AppContext};
use crate::error::CliError;

const AUTOSAVE_DESCRIPTION: &str = "Automatic save";
const SHUTDOWN_DESCRIPTION: &str = "Application closing";

/// Drain on a timer, autosave on a timer, and snapshot once more on Ctrl-C.
pub async fn run_watch(ctx: &AppContext, offline: bool) -> Result<(), CliError> {
    let mut drain_tick = interval(Duration::from_secs(ctx.config.drain_interval_secs));
    drain_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let autosave_every = Duration::from_secs(ctx.config.autosave_interval_secs);
    let now = tokio::time::Instant::now();
    let first_autosave = now.checked_add(autosave_every).unwrap_or(now);
    let mut autosave_tick = tokio::time::interval_at(first_autosave, autosave_every);
    autosave_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    println!(
        "Watching (drain every {}s, autosave every {}s). Press Ctrl-C to stop.",
        ctx.config.drain_interval_secs, ctx.config.autosave_interval_secs
    );

    loop {
        tokio::select! {
            _ = drain_tick.tick() => drain_once(ctx, offline).await,
            _ = autosave_tick.tick() => {
                if let Err(error) = ctx
                    .recovery
                    .create(&ctx.engine, AUTOSAVE_DESCRIPTION, SnapshotKind::Automatic, None)
                    .await
                {
                    tracing::warn!("Autosave failed: {}", error);
                }
            }
            result = &mut shutdown => {
                result?;
                break;
            }
        }
    }

    let id = ctx
        .recovery
        .create(&ctx.engine, SHUTDOWN_DESCRIPTION, SnapshotKind::Automatic, None)
        .await?;
    println!("Saved recovery point {id}");
    Ok(())
}

/// Refresh connectivity from the API health check, then drain.
///
/// Coming back online drains as part of the transition.
async fn drain_once(ctx: &AppContext, offline: bool) {
    let Some(remote) = ctx.engine.remote().as_ref().filter(|_| !offline) else {
        return;
    };

    let reachable = match remote.probe().await {
        Ok(()) => true,
        Err(error) => {
            tracing::debug!("API unreachable: {}", error);
            false
        }
    };

    let report = match ctx.engine.set_online(reachable).await {
        Some(report) => report,
        None if reachable => ctx.engine.drain().await,
        None => return,
    };
    if report.delivered > 0 {
        tracing::info!("Sync: {}", describe_drain(&report));
    } else {
        tracing::debug!("Sync: {}", describe_drain(&report));
    }

    if let Some(stuck) = ctx.engine.stuck_operation().await {
        tracing::warn!(
            operation = %stuck.operation.id,
            attempts = stuck.attempts,
            "Sync operation is stuck; run `wsm queue discard` to move it aside"
        );
    }
}
