use axum::Extension;
use axum::Json;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::extract::rejection::QueryRejection;
use axum::http::StatusCode;
use reprice_core::TriggerSource;
use reprice_state::RecalculationJob;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use crate::AppState;
use crate::auth::AuthenticatedOperator;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub(crate) struct ListJobsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TriggerAccepted {
    accepted: bool,
}

/// `GET /jobs`: newest first.
pub(crate) async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> Result<Json<Vec<RecalculationJob>>, ApiError> {
    let Query(query) = query.map_err(|err| ApiError::BadRequest(err.body_text()))?;
    let limit = state.jobs.effective_limit(query.limit);
    let jobs = state.state_db.list_recalculation_jobs(limit).await?;
    Ok(Json(jobs))
}

/// `GET /jobs/current`: the running job, or `null`.
pub(crate) async fn current_job(
    State(state): State<AppState>,
) -> Result<Json<Option<RecalculationJob>>, ApiError> {
    let job = state.state_db.current_recalculation_job().await?;
    Ok(Json(job))
}

pub(crate) async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<RecalculationJob>, ApiError> {
    state
        .state_db
        .get_recalculation_job(&job_id)
        .await?
        .map(Json)
        .ok_or(ApiError::JobNotFound(job_id))
}

/// `POST /trigger`: queue a manual recalculation.
pub(crate) async fn trigger(
    State(state): State<AppState>,
    Extension(operator): Extension<AuthenticatedOperator>,
) -> (StatusCode, Json<TriggerAccepted>) {
    info!(user_id = %operator.user_id, "manual recalculation requested");
    state.gateway.trigger(TriggerSource::Manual, operator.user_id);
    (StatusCode::ACCEPTED, Json(TriggerAccepted { accepted: true }))
}

pub(crate) async fn health() -> &'static str {
    "ok"
}
