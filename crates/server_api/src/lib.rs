use shared::{
    domain::{StageId, WellId},
    error::{ApiError, ErrorCode},
    order::StageOrder,
    protocol::{
        NewStage, NewWell, ReorderRequest, StageSummary, StageUpdate, WellDetail, WellSummary,
    },
};
use storage::{
    ReorderOutcome, StageInsertOutcome, Storage, StoredStage, StoredWell, WellInsertOutcome,
};
use tracing::{error, info, warn};

/// Shown to clients for any infrastructure failure; details stay in the log.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error; please retry";
pub const REORDER_FAILED_MESSAGE: &str = "could not save stage order; please retry";

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

/// Persists a complete stage order for a well.
///
/// Input is validated before the store is touched: the well id must be positive
/// and the order a non-empty list of distinct integers. Everything after that
/// happens inside one store transaction; see [`Storage::reorder_stages`].
pub async fn reorder_stages(
    ctx: &ApiContext,
    well_id: WellId,
    request: &ReorderRequest,
) -> Result<(), ApiError> {
    ensure_positive_well_id(well_id)?;
    let order = StageOrder::from_json(&request.order)
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let outcome = ctx
        .storage
        .reorder_stages(well_id, &order)
        .await
        .map_err(|err| {
            error!(well_id = well_id.0, error = %format!("{err:#}"), "stage reorder failed");
            ApiError::new(ErrorCode::Internal, REORDER_FAILED_MESSAGE)
        })?;

    match outcome {
        ReorderOutcome::Applied => {
            info!(well_id = well_id.0, stages = order.len(), "stage order saved");
            Ok(())
        }
        ReorderOutcome::UnknownWell => Err(ApiError::not_found("well not found")),
        ReorderOutcome::MembershipMismatch { updated, submitted } => {
            warn!(
                well_id = well_id.0,
                updated, submitted, "stage order does not match well membership"
            );
            Err(ApiError::conflict(
                describe_membership_conflict(ctx, well_id, &order).await,
            ))
        }
        ReorderOutcome::PartialOrder {
            stage_count,
            submitted,
        } => Err(ApiError::validation(format!(
            "order lists {submitted} of the well's {stage_count} stages; every stage must be included"
        ))),
    }
}

/// Names the ids that made a reorder inconsistent. Runs after the rollback, so
/// it is informative only; a lookup failure falls back to a generic message.
async fn describe_membership_conflict(
    ctx: &ApiContext,
    well_id: WellId,
    order: &StageOrder,
) -> String {
    let mut foreign = Vec::new();
    let mut missing = Vec::new();
    for stage_id in order.ids() {
        match ctx.storage.well_for_stage(*stage_id).await {
            Ok(Some(owner)) if owner == well_id => {}
            Ok(Some(_)) => foreign.push(stage_id.to_string()),
            Ok(None) => missing.push(stage_id.to_string()),
            Err(err) => {
                warn!(error = %err, "well ownership lookup failed");
                return "stage order is out of date; reload the stages and try again".to_string();
            }
        }
    }

    let mut parts = Vec::new();
    if !foreign.is_empty() {
        parts.push(format!("stages {} belong to another well", foreign.join(", ")));
    }
    if !missing.is_empty() {
        parts.push(format!("stages {} no longer exist", missing.join(", ")));
    }
    if parts.is_empty() {
        parts.push("stages changed while saving".to_string());
    }
    format!(
        "stage order is out of date ({}); reload the stages and try again",
        parts.join("; ")
    )
}

pub async fn list_stages(ctx: &ApiContext, well_id: WellId) -> Result<Vec<StageSummary>, ApiError> {
    ensure_positive_well_id(well_id)?;
    ensure_well_exists(ctx, well_id).await?;
    let stages = ctx.storage.list_stages(well_id).await.map_err(internal)?;
    Ok(stages.into_iter().map(stage_summary).collect())
}

pub async fn well_detail(ctx: &ApiContext, well_id: WellId) -> Result<WellDetail, ApiError> {
    ensure_positive_well_id(well_id)?;
    let well = ensure_well_exists(ctx, well_id).await?;
    let stages = ctx.storage.list_stages(well_id).await.map_err(internal)?;
    Ok(WellDetail {
        well: well_summary(well),
        stages: stages.into_iter().map(stage_summary).collect(),
    })
}

pub async fn create_well(ctx: &ApiContext, well: &NewWell) -> Result<WellId, ApiError> {
    if well.name.trim().is_empty() {
        return Err(ApiError::validation("well name is required"));
    }
    for stage in &well.stages {
        ensure_valid_position(stage.position)?;
    }
    match ctx.storage.create_well(well).await.map_err(internal)? {
        WellInsertOutcome::Created(well_id) => {
            info!(well_id = well_id.0, stages = well.stages.len(), "well created");
            Ok(well_id)
        }
        WellInsertOutcome::PositionTaken(position) => Err(ApiError::validation(format!(
            "position {position} is assigned to more than one stage"
        ))),
    }
}

pub async fn delete_well(ctx: &ApiContext, well_id: WellId) -> Result<(), ApiError> {
    if !ctx.storage.delete_well(well_id).await.map_err(internal)? {
        return Err(ApiError::not_found("well not found"));
    }
    info!(well_id = well_id.0, "well deleted");
    Ok(())
}

pub async fn create_stage(
    ctx: &ApiContext,
    well_id: WellId,
    stage: &NewStage,
) -> Result<StageId, ApiError> {
    ensure_positive_well_id(well_id)?;
    ensure_valid_position(stage.position)?;
    match ctx
        .storage
        .create_stage(well_id, stage)
        .await
        .map_err(internal)?
    {
        StageInsertOutcome::Created(stage_id) => Ok(stage_id),
        StageInsertOutcome::UnknownWell => Err(ApiError::not_found("well not found")),
        StageInsertOutcome::PositionTaken(position) => Err(ApiError::conflict(format!(
            "position {position} is already used in this well"
        ))),
    }
}

pub async fn update_stage(
    ctx: &ApiContext,
    stage_id: StageId,
    update: &StageUpdate,
) -> Result<(), ApiError> {
    if !ctx
        .storage
        .update_stage(stage_id, update)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::not_found("stage not found"));
    }
    Ok(())
}

/// Deletes a stage without renumbering the remaining ones.
pub async fn delete_stage(ctx: &ApiContext, stage_id: StageId) -> Result<(), ApiError> {
    if !ctx.storage.delete_stage(stage_id).await.map_err(internal)? {
        return Err(ApiError::not_found("stage not found"));
    }
    Ok(())
}

fn ensure_positive_well_id(well_id: WellId) -> Result<(), ApiError> {
    if well_id.0 <= 0 {
        return Err(ApiError::validation("well id must be a positive integer"));
    }
    Ok(())
}

fn ensure_valid_position(position: Option<i64>) -> Result<(), ApiError> {
    match position {
        Some(position) if position < 1 => Err(ApiError::validation(format!(
            "position must be at least 1, got {position}"
        ))),
        _ => Ok(()),
    }
}

async fn ensure_well_exists(ctx: &ApiContext, well_id: WellId) -> Result<StoredWell, ApiError> {
    ctx.storage
        .well(well_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found("well not found"))
}

fn well_summary(well: StoredWell) -> WellSummary {
    WellSummary {
        well_id: well.well_id,
        kind: well.kind,
        team: well.team,
        name: well.name,
        start_date: well.start_date,
        created_at: well.created_at,
    }
}

fn stage_summary(stage: StoredStage) -> StageSummary {
    StageSummary {
        stage_id: stage.stage_id,
        well_id: stage.well_id,
        stage_name: stage.stage_name,
        pipe: stage.pipe,
        drill_time: stage.drill_time,
        stage_change: stage.stage_change,
        progress: stage.progress,
        position: stage.position,
        updated_at: stage.updated_at,
    }
}

fn internal(err: anyhow::Error) -> ApiError {
    error!(error = %format!("{err:#}"), "storage operation failed");
    ApiError::new(ErrorCode::Internal, INTERNAL_ERROR_MESSAGE)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
