use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

use crate::instrument::Asset;

/// Errors surfaced by the engine. All of them are caller errors and none
/// are retried internally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("insufficient {asset} balance: required {required}, available {available}")]
    InsufficientBalance {
        asset: Asset,
        required: Decimal,
        available: Decimal,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    InvalidState(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Errors produced by the HTTP layer.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("missing or invalid x-user-id header")]
    MissingIdentity,

    #[error("{message}")]
    BadBody { status: StatusCode, message: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(e) => match e {
                EngineError::Validation(_) => StatusCode::BAD_REQUEST,
                EngineError::InsufficientBalance { .. } => StatusCode::BAD_REQUEST,
                EngineError::NotFound(_) => StatusCode::NOT_FOUND,
                EngineError::Unauthorized(_) => StatusCode::FORBIDDEN,
                EngineError::InvalidState(_) => StatusCode::BAD_REQUEST,
            },
            ApiError::MissingIdentity => StatusCode::UNAUTHORIZED,
            ApiError::BadBody { status, .. } => *status,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_client_error() {
            tracing::warn!(%status, "request rejected: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
