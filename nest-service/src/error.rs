//! Errors surfaced to enrollment clients.
//!
//! Every failure resolves to a status code plus an [`ApiError`] body. Internal
//! failures keep their full cause chain for the server log and only expose a
//! generic message to the client.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::{error, warn};

use crate::types::ApiError;

pub type Result<T> = std::result::Result<T, NestError>;

#[derive(Debug, Error)]
pub enum NestError {
    /// Malformed or policy-violating request; the client can correct it.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The request acts on a hostname other than the one it claims.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The enrollment record is in the wrong state for this operation.
    #[error("Conflict: {message}")]
    Conflict { message: String, hint: Option<String> },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage, serialization or downstream collaborator failure.
    #[error("Internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl NestError {
    pub fn conflict(message: impl Into<String>, hint: Option<String>) -> Self {
        NestError::Conflict {
            message: message.into(),
            hint,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            NestError::BadRequest(_) => StatusCode::BAD_REQUEST,
            NestError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            NestError::Conflict { .. } => StatusCode::CONFLICT,
            NestError::NotFound(_) => StatusCode::NOT_FOUND,
            NestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body sent to the client.
    pub fn to_api_error(&self) -> ApiError {
        let message = match self {
            NestError::Conflict { message, hint } => match hint {
                Some(hint) => format!("Conflict. {} {}", message, hint),
                None => format!("Conflict. {}", message),
            },
            NestError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        ApiError {
            code: self.status().as_u16(),
            message,
        }
    }
}

impl IntoResponse for NestError {
    fn into_response(self) -> Response {
        match &self {
            NestError::Internal(e) => error!("Request failed: {:#}", e),
            NestError::Unauthorized(msg) => warn!("Rejected possible spoofing attempt: {}", msg),
            other => warn!("Request rejected: {}", other),
        }

        (self.status(), Json(self.to_api_error())).into_response()
    }
}
