use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{error, warn};

use crate::services::ServiceError;
use crate::AppState;

pub mod bots;
pub mod clients;
pub mod invoices;
pub mod jobs;
pub mod plans;
pub mod stats;
pub mod subscribers;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid API key")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Conflict(String),
    #[error("upstream call failed")]
    BadGateway,
    #[error("internal error")]
    Internal,
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound(what) => ApiError::NotFound(format!("{what} not found")),
            ServiceError::InvalidInput(msg) => ApiError::BadRequest(msg),
            ServiceError::Conflict(msg) => ApiError::Conflict(msg),
            ServiceError::Upstream(e) => {
                warn!("Upstream call failed: {:#}", e);
                ApiError::BadGateway
            }
            ServiceError::Store(e) => {
                error!("Store failure: {:#}", e);
                ApiError::Internal
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ServiceError::Store(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::BadGateway => StatusCode::BAD_GATEWAY,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Rejects the request unless `x-api-key` matches the configured key. With
/// no key configured every request is rejected.
async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_api_key.as_deref() else {
        return Err(ApiError::Unauthorized);
    };
    let presented = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    if !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(req).await)
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/subscribers/{id}", get(subscribers::get_subscriber))
        .route("/subscribers/{id}/extend", post(subscribers::extend))
        .route("/subscribers/{id}/revoke", post(subscribers::revoke))
        .route("/clients", get(clients::list))
        .route("/clients/{id}", get(clients::get_client))
        .route("/clients/{id}/approve", post(clients::approve))
        .route("/clients/{id}/suspend", post(clients::suspend))
        .route("/clients/{id}/trial", post(clients::start_trial))
        .route("/bots", get(bots::list))
        .route("/bots/{id}", get(bots::get_bot))
        .route("/bots/{id}/subscribers", get(bots::subscribers))
        .route("/bots/{id}/pause", post(bots::pause))
        .route("/bots/{id}/activate", post(bots::activate))
        .route("/plans", get(plans::list).post(plans::create))
        .route("/plans/{id}", get(plans::get_plan).patch(plans::update).delete(plans::deactivate))
        .route("/invoices", post(invoices::open_invoice))
        .route("/jobs/{job}", post(jobs::run_job))
        .route("/stats", get(stats::get_stats))
        .layer(middleware::from_fn_with_state(state, require_api_key))
}
