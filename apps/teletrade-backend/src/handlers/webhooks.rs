use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Deserializer};
use serde_json::json;
use teletrade_db::models::payment::{PaymentOutcome, PaymentUpdate};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::services::payment::{id_string, opt_id_string, SignatureError};
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-nowpayments-sig";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid signature")]
    Unauthorized,
    #[error("IPN secret is not configured")]
    MissingSecret,
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("transient failure: {0:#}")]
    Transient(anyhow::Error),
}

impl From<SignatureError> for WebhookError {
    fn from(e: SignatureError) -> Self {
        match e {
            SignatureError::MissingSecret => WebhookError::MissingSecret,
            SignatureError::MissingSignature | SignatureError::Mismatch => WebhookError::Unauthorized,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::Unauthorized | WebhookError::MissingSecret => StatusCode::FORBIDDEN,
            WebhookError::Malformed(_) => StatusCode::BAD_REQUEST,
            WebhookError::Transient(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// NOWPayments IPN body. Only the fields the state machine needs.
#[derive(Debug, Deserialize)]
pub struct IpnPayload {
    #[serde(deserialize_with = "id_string")]
    pub invoice_id: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub payment_id: Option<String>,
    pub payment_status: String,
    #[serde(default, deserialize_with = "opt_amount")]
    pub actually_paid: Option<f64>,
    #[serde(default)]
    pub pay_currency: Option<String>,
}

fn opt_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAmount {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<RawAmount>::deserialize(deserializer)? {
        Some(RawAmount::Number(n)) => Some(n),
        Some(RawAmount::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

fn outcome_label(outcome: &PaymentOutcome) -> &'static str {
    match outcome {
        PaymentOutcome::ActivatedSubscriber(_)
        | PaymentOutcome::ActivatedClient(_)
        | PaymentOutcome::Recorded { .. } => "processed",
        PaymentOutcome::Duplicate { .. } => "duplicate",
        PaymentOutcome::Rejected { .. } => "ignored",
        PaymentOutcome::NotFound => "not_found",
    }
}

/// `POST /webhooks/nowpayments`. The signature is checked over the raw body
/// before anything is parsed.
pub async fn nowpayments_ipn(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, WebhookError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());
    let provider = state.payments.provider();
    if let Err(e) = provider.verify_signature(&body, signature) {
        warn!(provider = provider.name(), "Rejected payment webhook: {}", e);
        return Err(e.into());
    }

    let payload: IpnPayload =
        serde_json::from_slice(&body).map_err(|e| WebhookError::Malformed(e.to_string()))?;
    let update = PaymentUpdate {
        status: provider.map_status(&payload.payment_status),
        invoice_id: payload.invoice_id,
        payment_id: payload.payment_id,
        paid_amount: payload.actually_paid,
        paid_currency: payload.pay_currency,
    };
    info!(invoice_id = %update.invoice_id, raw_status = %payload.payment_status, status = ?update.status, "Received payment webhook");

    let outcome = state
        .payments
        .apply_update(&update, Utc::now())
        .await
        .map_err(|e| {
            error!(invoice_id = %update.invoice_id, "Failed to apply payment status: {:#}", e);
            WebhookError::Transient(e)
        })?;

    let label = outcome_label(&outcome);
    state.payments.spawn_fulfilment(outcome);
    Ok(Json(json!({ "status": label })))
}
