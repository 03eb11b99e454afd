use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use teletrade_db::models::bot::SellingBot;
use teletrade_db::models::subscriber::{Subscriber, SubscriptionStatus};
use uuid::Uuid;

use super::ApiError;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct BotQuery {
    pub client_id: Option<Uuid>,
}

/// Credentials never leave the store: `SellingBot` skips them on serialize.
pub async fn list(State(state): State<AppState>, Query(query): Query<BotQuery>) -> Result<Json<Vec<SellingBot>>, ApiError> {
    Ok(Json(state.ledger.list_bots(query.client_id).await?))
}

async fn load(state: &AppState, id: Uuid) -> Result<SellingBot, ApiError> {
    state
        .ledger
        .bot(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("bot {id} not found")))
}

pub async fn get_bot(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<SellingBot>, ApiError> {
    Ok(Json(load(&state, id).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct SubscriberQuery {
    pub status: Option<SubscriptionStatus>,
}

pub async fn subscribers(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<SubscriberQuery>,
) -> Result<Json<Vec<Subscriber>>, ApiError> {
    load(&state, id).await?;
    Ok(Json(state.ledger.bot_subscribers(id, query.status).await?))
}

pub async fn pause(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<SellingBot>, ApiError> {
    Ok(Json(state.clients.pause_bot(id, Utc::now()).await?))
}

/// The supervisor picks the bot up on its next sync.
pub async fn activate(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<SellingBot>, ApiError> {
    Ok(Json(state.clients.activate_bot(id, Utc::now()).await?))
}
