use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use teletrade_db::models::client::{Client, ClientStatus};
use uuid::Uuid;

use super::ApiError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ClientQuery {
    pub status: Option<ClientStatus>,
}

pub async fn list(State(state): State<AppState>, Query(query): Query<ClientQuery>) -> Result<Json<Vec<Client>>, ApiError> {
    Ok(Json(state.ledger.list_clients(query.status).await?))
}

pub async fn get_client(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Client>, ApiError> {
    let client = state
        .ledger
        .client(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("client {id} not found")))?;
    Ok(Json(client))
}

pub async fn approve(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Client>, ApiError> {
    Ok(Json(state.clients.approve(id, Utc::now()).await?))
}

#[derive(Debug, Serialize)]
pub struct SuspendResponse {
    pub previous_status: ClientStatus,
    pub paused_bots: Vec<Uuid>,
}

pub async fn suspend(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<SuspendResponse>, ApiError> {
    let outcome = state.clients.suspend(id, Utc::now()).await?;
    Ok(Json(SuspendResponse {
        previous_status: outcome.previous,
        paused_bots: outcome.paused_bots,
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct TrialRequest {
    /// Defaults to the configured trial length.
    pub days: Option<i64>,
}

pub async fn start_trial(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    body: Option<Json<TrialRequest>>,
) -> Result<Json<Client>, ApiError> {
    let days = body.and_then(|Json(r)| r.days).unwrap_or(state.trial_days);
    Ok(Json(state.clients.start_trial(id, days, Utc::now()).await?))
}
