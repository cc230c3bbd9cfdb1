use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use server_api::{
    create_stage, create_well, delete_stage, delete_well, list_stages, reorder_stages,
    update_stage, well_detail, ApiContext,
};
use shared::{
    domain::{StageId, WellId},
    error::{ApiError, ErrorCode},
    protocol::{
        Ack, Created, Envelope, ErrorBody, NewStage, NewWell, ReorderRequest, StageSummary,
        StageUpdate, WellDetail,
    },
};
use storage::Storage;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

type HttpError = (StatusCode, Json<ErrorBody>);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (settings, config_error) = load_settings();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    if let Some(error) = config_error {
        warn!(%error, "ignoring malformed config file");
    }

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::with_busy_timeout(
        &database_url,
        Duration::from_millis(settings.busy_timeout_ms),
    )
    .await
    .map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState {
        api: ApiContext { storage },
    };
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/operativo/wells", post(http_create_well))
        .route(
            "/api/operativo/wells/:well_id",
            get(http_well_detail).delete(http_delete_well),
        )
        .route(
            "/api/operativo/wells/:well_id/stages",
            get(http_list_stages).post(http_create_stage),
        )
        .route(
            "/api/operativo/wells/:well_id/stages/reorder",
            post(http_reorder_stages),
        )
        .route(
            "/api/operativo/stages/:stage_id",
            put(http_update_stage).delete(http_delete_stage),
        )
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> HttpError {
    (status_for(err.code), Json(ErrorBody::from(err)))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, HttpError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        let (status, body) = reject(ApiError::validation(rejection.body_text()));
        // Body size limits keep their own status.
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            (StatusCode::PAYLOAD_TOO_LARGE, body)
        } else {
            (status, body)
        }
    })
}

fn path_id(path: Result<Path<i64>, PathRejection>) -> Result<i64, HttpError> {
    path.map(|Path(id)| id)
        .map_err(|_| reject(ApiError::validation("id in path must be an integer")))
}

async fn healthz(State(state): State<Arc<AppState>>) -> (StatusCode, &'static str) {
    match state.api.storage.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(error) => {
            warn!(%error, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

async fn http_reorder_stages(
    State(state): State<Arc<AppState>>,
    well_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<ReorderRequest>, JsonRejection>,
) -> Result<Json<Ack>, HttpError> {
    let well_id = WellId(path_id(well_id)?);
    let request = json_body(payload)?;
    reorder_stages(&state.api, well_id, &request)
        .await
        .map_err(reject)?;
    Ok(Json(Ack::ok()))
}

async fn http_list_stages(
    State(state): State<Arc<AppState>>,
    well_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Envelope<Vec<StageSummary>>>, HttpError> {
    let well_id = WellId(path_id(well_id)?);
    let stages = list_stages(&state.api, well_id).await.map_err(reject)?;
    Ok(Json(Envelope::new(stages)))
}

async fn http_create_stage(
    State(state): State<Arc<AppState>>,
    well_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<NewStage>, JsonRejection>,
) -> Result<Json<Created<StageId>>, HttpError> {
    let well_id = WellId(path_id(well_id)?);
    let stage = json_body(payload)?;
    let stage_id = create_stage(&state.api, well_id, &stage)
        .await
        .map_err(reject)?;
    Ok(Json(Created::new(stage_id)))
}

async fn http_update_stage(
    State(state): State<Arc<AppState>>,
    stage_id: Result<Path<i64>, PathRejection>,
    payload: Result<Json<StageUpdate>, JsonRejection>,
) -> Result<Json<Ack>, HttpError> {
    let stage_id = StageId(path_id(stage_id)?);
    let update = json_body(payload)?;
    update_stage(&state.api, stage_id, &update)
        .await
        .map_err(reject)?;
    Ok(Json(Ack::ok()))
}

async fn http_delete_stage(
    State(state): State<Arc<AppState>>,
    stage_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Ack>, HttpError> {
    let stage_id = StageId(path_id(stage_id)?);
    delete_stage(&state.api, stage_id).await.map_err(reject)?;
    Ok(Json(Ack::ok()))
}

async fn http_create_well(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewWell>, JsonRejection>,
) -> Result<Json<Created<WellId>>, HttpError> {
    let well = json_body(payload)?;
    let well_id = create_well(&state.api, &well).await.map_err(reject)?;
    Ok(Json(Created::new(well_id)))
}

async fn http_well_detail(
    State(state): State<Arc<AppState>>,
    well_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Envelope<WellDetail>>, HttpError> {
    let well_id = WellId(path_id(well_id)?);
    let detail = well_detail(&state.api, well_id).await.map_err(reject)?;
    Ok(Json(Envelope::new(detail)))
}

async fn http_delete_well(
    State(state): State<Arc<AppState>>,
    well_id: Result<Path<i64>, PathRejection>,
) -> Result<Json<Ack>, HttpError> {
    let well_id = WellId(path_id(well_id)?);
    delete_well(&state.api, well_id).await.map_err(reject)?;
    Ok(Json(Ack::ok()))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
