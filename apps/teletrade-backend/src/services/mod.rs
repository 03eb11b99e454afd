use thiserror::Error;

pub mod access_control;
pub mod catalog_service;
pub mod client_service;
pub mod messaging;
pub mod notification_service;
pub mod payment;
pub mod payment_service;

/// Errors surfaced by the engine services to their callers.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("upstream failure: {0:#}")]
    Upstream(anyhow::Error),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}
