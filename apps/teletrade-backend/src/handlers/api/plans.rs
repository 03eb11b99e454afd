use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use teletrade_db::models::plan::{NewPlan, PlanChanges, PlanFilter, SubscriptionPlan};
use uuid::Uuid;

use super::ApiError;
use crate::AppState;

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<PlanFilter>,
) -> Result<Json<Vec<SubscriptionPlan>>, ApiError> {
    Ok(Json(state.catalog.plans(&filter).await?))
}

pub async fn get_plan(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<SubscriptionPlan>, ApiError> {
    Ok(Json(state.catalog.plan(id).await?))
}

pub async fn create(
    State(state): State<AppState>,
    Json(new): Json<NewPlan>,
) -> Result<(StatusCode, Json<SubscriptionPlan>), ApiError> {
    let plan = state.catalog.create_plan(new, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(changes): Json<PlanChanges>,
) -> Result<Json<SubscriptionPlan>, ApiError> {
    Ok(Json(state.catalog.update_plan(id, changes).await?))
}

/// Soft delete: the row stays for the payments that reference it.
pub async fn deactivate(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<SubscriptionPlan>, ApiError> {
    Ok(Json(state.catalog.deactivate_plan(id).await?))
}
