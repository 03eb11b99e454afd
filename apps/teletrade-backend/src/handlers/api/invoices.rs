use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Deserialize;
use teletrade_db::models::payment::Payer;
use uuid::Uuid;

use super::ApiError;
use crate::services::payment_service::OpenedInvoice;
use crate::AppState;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayerType {
    Subscriber,
    Client,
}

#[derive(Debug, Deserialize)]
pub struct OpenInvoiceRequest {
    pub payer_type: PayerType,
    pub payer_id: Uuid,
    pub plan_id: Uuid,
}

pub async fn open_invoice(
    State(state): State<AppState>,
    Json(req): Json<OpenInvoiceRequest>,
) -> Result<(StatusCode, Json<OpenedInvoice>), ApiError> {
    let payer = match req.payer_type {
        PayerType::Subscriber => Payer::Subscriber(req.payer_id),
        PayerType::Client => Payer::Client(req.payer_id),
    };
    let opened = state.payments.open_invoice(payer, req.plan_id, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(opened)))
}
