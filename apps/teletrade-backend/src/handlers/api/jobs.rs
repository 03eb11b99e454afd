use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;

use super::ApiError;
use crate::jobs::{JobKind, JobReport};
use crate::AppState;

pub async fn run_job(State(state): State<AppState>, Path(job): Path<String>) -> Result<Json<JobReport>, ApiError> {
    let kind: JobKind = job.parse().map_err(ApiError::NotFound)?;
    state
        .lifecycle
        .run(kind, Utc::now())
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::Conflict(format!("{} is already running", kind.as_str())))
}
