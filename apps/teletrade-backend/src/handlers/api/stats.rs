use axum::{extract::State, Json};
use teletrade_db::models::stats::PlatformStats;

use super::ApiError;
use crate::AppState;

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<PlatformStats>, ApiError> {
    Ok(Json(state.ledger.stats().await?))
}
