use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::server::AppState;
use crate::server::dto::{CompleteAnalysisRequest, StartAnalysisRequest, StartAnalysisResponse};
use crate::server::response::{ApiError, StoreResultExt, blocking};
use crate::server::validation::{reported_dependencies, required};

/// Signal from the build system that an analysis has started.
///
/// Every call creates a new analysis; clients retrying on network errors
/// may leave duplicate in-progress analyses behind.
pub async fn start_analysis(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartAnalysisRequest>,
) -> impl IntoResponse {
    let repo = required(req.repo, "repo")?;
    let commit = required(req.commit, "commit")?;
    let notify = required(req.notify, "notify")?;

    let lifecycle = state.lifecycle.clone();
    let analysis = blocking(move || lifecycle.start_analysis(&repo, &commit, &notify))
        .await?
        .api_err("Target not found")?;

    Ok::<_, ApiError>(Json(StartAnalysisResponse { id: analysis.id }))
}

/// Signal from the build system that an analysis has finished, with the
/// dependencies it resolved.
pub async fn complete_analysis(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<String>,
    Json(req): Json<CompleteAnalysisRequest>,
) -> impl IntoResponse {
    let status = required(req.status, "status")?;
    let dependencies = reported_dependencies(required(req.dependencies, "dependencies")?)?;

    let lifecycle = state.lifecycle.clone();
    blocking(move || lifecycle.complete_analysis(&analysis_id, &status, &dependencies))
        .await?
        .api_err("Analysis not found")?;

    Ok::<_, ApiError>(StatusCode::OK)
}

pub async fn get_analysis(
    State(state): State<Arc<AppState>>,
    Path(analysis_id): Path<String>,
) -> impl IntoResponse {
    let lifecycle = state.lifecycle.clone();
    let report = blocking(move || lifecycle.report(&analysis_id))
        .await?
        .api_err("Analysis not found")?;

    Ok::<_, ApiError>(Json(report))
}
