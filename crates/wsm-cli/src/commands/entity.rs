use wsm_core::sync::MutationOutcome;
use wsm_core::EntityKind;

use crate::cli::{EntityCommands, KindArg, WorkspaceCommands};
use crate::commands::common::{
    describe_drain, entity_to_list_item, format_entity_lines, parse_field_assignments,
    resolve_entity_id, AppContext, EntityListItem,
};
use crate::error::CliError;

pub async fn run_entity(ctx: &AppContext, command: EntityCommands) -> Result<(), CliError> {
    match command {
        EntityCommands::Add { kind, fields } => run_add(ctx, kind, &fields).await,
        EntityCommands::Update { id, fields } => run_update(ctx, &id, &fields).await,
        EntityCommands::Delete { id } => run_delete(ctx, &id).await,
        EntityCommands::Show { id, json } => run_show(ctx, &id, json).await,
        EntityCommands::List {
            kind,
            include_deleted,
            json,
        } => run_list(ctx, kind, include_deleted, json).await,
    }
}

pub async fn run_workspace(ctx: &AppContext, command: WorkspaceCommands) -> Result<(), CliError> {
    match command {
        WorkspaceCommands::Save { id, fields } => {
            let id = resolve_entity_id(ctx, &id).await?;
            let changes = parse_field_assignments(&fields)?;
            let outcome = ctx.engine.save_workspace(&id, changes).await?;
            print_outcome("Saved", &outcome);
            Ok(())
        }
    }
}

pub async fn run_add(ctx: &AppContext, kind: KindArg, fields: &[String]) -> Result<(), CliError> {
    let fields = parse_field_assignments(fields)?;
    let outcome = ctx.engine.create_entity(kind.into(), fields).await?;
    print_outcome("Created", &outcome);
    Ok(())
}

pub async fn run_update(ctx: &AppContext, id: &str, fields: &[String]) -> Result<(), CliError> {
    let id = resolve_entity_id(ctx, id).await?;
    let changes = parse_field_assignments(fields)?;
    let outcome = ctx.engine.update_entity(&id, changes).await?;
    print_outcome("Updated", &outcome);
    Ok(())
}

pub async fn run_delete(ctx: &AppContext, id: &str) -> Result<(), CliError> {
    let id = resolve_entity_id(ctx, id).await?;
    let outcome = ctx.engine.delete_entity(&id).await?;
    print_outcome("Deleted", &outcome);
    Ok(())
}

pub async fn run_show(ctx: &AppContext, id: &str, as_json: bool) -> Result<(), CliError> {
    let id = resolve_entity_id(ctx, id).await?;
    let entity = ctx
        .engine
        .get_entity(&id)
        .await?
        .ok_or_else(|| CliError::NotFound(id.to_string()))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&entity)?);
    } else {
        for line in format_entity_lines(std::slice::from_ref(&entity)) {
            println!("{line}");
        }
        println!("{}", serde_json::to_string_pretty(&entity.fields)?);
    }
    Ok(())
}

pub async fn run_list(
    ctx: &AppContext,
    kind: Option<KindArg>,
    include_deleted: bool,
    as_json: bool,
) -> Result<(), CliError> {
    let entities = ctx
        .engine
        .list_entities(kind.map(EntityKind::from), include_deleted)
        .await?;

    if as_json {
        let items = entities
            .iter()
            .map(entity_to_list_item)
            .collect::<Vec<EntityListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else if entities.is_empty() {
        println!("No entities stored locally.");
    } else {
        for line in format_entity_lines(&entities) {
            println!("{line}");
        }
    }
    Ok(())
}

fn print_outcome(verb: &str, outcome: &MutationOutcome) {
    println!("{verb} {}", outcome.entity.reference());
    println!("Sync: {}", describe_drain(&outcome.drain));
}
