use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::server::AppState;
use crate::server::dto::RecordVulnerabilitiesRequest;
use crate::server::response::{ApiError, StoreResultExt, blocking};

/// Called by the vulnerability resolver once it has matched an installed
/// dependency against known CVEs.
pub async fn record_vulnerabilities(
    State(state): State<Arc<AppState>>,
    Path(dependency_id): Path<String>,
    Json(req): Json<RecordVulnerabilitiesRequest>,
) -> impl IntoResponse {
    let lifecycle = state.lifecycle.clone();
    blocking(move || {
        lifecycle.record_vulnerabilities(&dependency_id, req.cpe.as_deref(), &req.cves)
    })
    .await?
    .api_err("Dependency not found")?;

    Ok::<_, ApiError>(StatusCode::OK)
}
