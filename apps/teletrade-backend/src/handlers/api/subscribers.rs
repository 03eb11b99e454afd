use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use teletrade_db::models::audit::{AccessControlLog, PerformedBy};
use teletrade_db::models::bot::SellingBot;
use teletrade_db::models::subscriber::Subscriber;
use uuid::Uuid;

use super::ApiError;
use crate::services::access_control::Actor;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct SubscriberDetails {
    pub subscriber: Subscriber,
    pub bot: SellingBot,
    pub access_log: Vec<AccessControlLog>,
}

pub async fn get_subscriber(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriberDetails>, ApiError> {
    let found = state
        .ledger
        .subscriber(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("subscriber {id} not found")))?;
    let access_log = state.ledger.access_log(id).await?;
    Ok(Json(SubscriberDetails {
        subscriber: found.subscriber,
        bot: found.bot,
        access_log,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ExtendRequest {
    pub days: i64,
    pub reason: Option<String>,
    pub performer_id: Option<String>,
    pub performer_type: PerformedBy,
}

pub async fn extend(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ExtendRequest>,
) -> Result<Json<Subscriber>, ApiError> {
    let actor = Actor {
        performed_by: req.performer_type,
        performer_id: req.performer_id,
    };
    let subscriber = state
        .access
        .manual_extend(id, req.days, &actor, req.reason, Utc::now())
        .await?;
    Ok(Json(subscriber))
}

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub reason: String,
    pub performer_id: Option<String>,
    pub performer_type: PerformedBy,
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub subscriber: Subscriber,
    /// `null` when the bot has no linked channel.
    pub removed_from_channel: Option<bool>,
}

pub async fn revoke(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RevokeRequest>,
) -> Result<Json<RevokeResponse>, ApiError> {
    if req.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("reason is required".into()));
    }
    let actor = Actor {
        performed_by: req.performer_type,
        performer_id: req.performer_id,
    };
    let outcome = state.access.manual_revoke(id, &actor, &req.reason, Utc::now()).await?;
    Ok(Json(RevokeResponse {
        subscriber: outcome.subscriber,
        removed_from_channel: outcome.removed,
    }))
}
