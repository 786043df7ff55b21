use crate::{AppState, error::AppError};
use analytics::{ArtifactInfo, DailyMetric, DataSource, Page, PerformanceReport, TradeRow};
use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use configuration::DocumentFormat;
use core_types::RunStatus;
use database::Run;
use jobs::Readiness;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct SubmitParams {
    #[serde(default)]
    format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    status: Option<RunStatus>,
}

#[derive(Debug, Deserialize)]
pub struct SourceParams {
    #[serde(default)]
    source: DataSource,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    source: DataSource,
}

fn default_limit() -> usize {
    100
}

const MAX_LIMIT: usize = 10_000;

#[derive(Debug, Serialize)]
pub struct Submitted {
    pub run_id: String,
    pub status: RunStatus,
}

/// # POST /api/runs
/// The body is the run document; `?format=toml` selects TOML, JSON otherwise.
pub async fn submit_run(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SubmitParams>,
    body: String,
) -> Result<(StatusCode, Json<Submitted>), AppError> {
    let format = match params.format.as_deref() {
        None | Some("json") => DocumentFormat::Json,
        Some("toml") => DocumentFormat::Toml,
        Some(other) => return Err(AppError::BadRequest(format!("unsupported format '{other}'"))),
    };
    let run = state.service.submit(&body, format).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(Submitted {
            run_id: run.run_id,
            status: run.status,
        }),
    ))
}

/// # GET /api/runs
pub async fn list_runs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Run>>, AppError> {
    Ok(Json(state.service.list_runs(params.status).await?))
}

/// # GET /api/runs/:run_id
pub async fn get_run(
    Path(run_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Run>, AppError> {
    Ok(Json(state.service.get_run(&run_id).await?))
}

/// # POST /api/runs/:run_id/cancel
pub async fn cancel_run(
    Path(run_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Run>, AppError> {
    Ok(Json(state.service.cancel(&run_id).await?))
}

/// # GET /api/runs/:run_id/summary
pub async fn get_summary(
    Path(run_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SourceParams>,
) -> Result<Json<PerformanceReport>, AppError> {
    Ok(Json(state.service.summary(&run_id, params.source).await?))
}

/// # GET /api/runs/:run_id/artifacts
pub async fn list_artifacts(
    Path(run_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SourceParams>,
) -> Result<Json<Vec<ArtifactInfo>>, AppError> {
    Ok(Json(state.service.list_artifacts(&run_id, params.source).await?))
}

/// # GET /api/runs/:run_id/artifacts/:name
/// Streams the artifact file as stored.
pub async fn download_artifact(
    Path((run_id, name)): Path<(String, String)>,
    State(state): State<Arc<AppState>>,
    Query(params): Query<SourceParams>,
) -> Result<impl IntoResponse, AppError> {
    let bytes = state.service.read_artifact(&run_id, &name, params.source).await?;
    let content_type = match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("jsonl") => "application/x-ndjson",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], Bytes::from(bytes)))
}

/// # GET /api/runs/:run_id/trades
pub async fn get_trades(
    Path(run_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Query(page): Query<Pagination>,
) -> Result<Json<Page<TradeRow>>, AppError> {
    let limit = page.limit.min(MAX_LIMIT);
    Ok(Json(state.service.trades(&run_id, page.offset, limit, page.source).await?))
}

/// # GET /api/runs/:run_id/metrics
pub async fn get_daily_metrics(
    Path(run_id): Path<String>,
    State(state): State<Arc<AppState>>,
    Query(page): Query<Pagination>,
) -> Result<Json<Page<DailyMetric>>, AppError> {
    let limit = page.limit.min(MAX_LIMIT);
    Ok(Json(
        state
            .service
            .daily_metrics(&run_id, page.offset, limit, page.source)
            .await?,
    ))
}

/// # GET /api/ready
/// 503 whenever the run store cannot be reached.
pub async fn readiness(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Readiness>) {
    let readiness = state.service.readiness().await;
    let status = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(readiness))
}
